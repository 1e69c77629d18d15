use anyhow::{Context, Result};

/// GET the image bytes. The 5-second budget is baked into the shared client;
/// any transport error or non-2xx status is a failure.
pub async fn fetch_image_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("image fetch failed for {url}"))?
        .error_for_status()
        .context("image fetch returned a non-success status")?;

    let body = response
        .bytes()
        .await
        .context("failed to read image body")?;

    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn unreachable_host_is_an_error() {
        let client = reqwest::Client::new();
        let result = fetch_image_bytes(&client, "http://127.0.0.1:9/image.jpg").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n")
                    .await;
            }
        });

        let client = reqwest::Client::new();
        let result = fetch_image_bytes(&client, &format!("http://{addr}/missing.png")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn success_returns_body_bytes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 4\r\n\r\nabcd")
                    .await;
            }
        });

        let client = reqwest::Client::new();
        let body = fetch_image_bytes(&client, &format!("http://{addr}/image.jpg"))
            .await
            .unwrap();
        assert_eq!(body, b"abcd");
    }
}
