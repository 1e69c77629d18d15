use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CaptionImageRequest {
    pub image_url: String,
}

#[derive(Debug, Serialize)]
pub struct CaptionImageResponse {
    pub caption: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_and_response_shapes() {
        let req: CaptionImageRequest =
            serde_json::from_value(json!({ "image_url": "https://example.com/image.jpg" }))
                .unwrap();
        assert_eq!(req.image_url, "https://example.com/image.jpg");

        let resp = CaptionImageResponse {
            caption: "a dog on a beach".into(),
        };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({ "caption": "a dog on a beach" })
        );
    }
}
