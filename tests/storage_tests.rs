use training_portal::storage::{
    MockStorageService, S3StorageClient, StorageService, image_object_key, sanitize_key,
};

#[cfg(test)]
mod mock_tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_success() {
        let mock = MockStorageService::new();
        let result = mock.upload_image("step.png", vec![1, 2, 3], "image/png").await;

        assert_eq!(result.unwrap(), "step.png");
        assert_eq!(
            mock.uploads(),
            vec![("step.png".to_string(), 3, "image/png".to_string())]
        );
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let mock = MockStorageService::new_failing();
        let result = mock.upload_image("step.png", vec![1], "image/png").await;
        assert!(result.is_err());
        assert!(mock.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_mock_sanitization() {
        let mock = MockStorageService::new();
        let path = mock
            .upload_image("../../etc/passwd", vec![0], "image/png")
            .await
            .unwrap();

        assert!(!path.contains(".."));
        assert_eq!(path, "etc/passwd");
        assert!(!mock.public_url("../x.png").contains(".."));
    }
}

#[cfg(test)]
mod key_tests {
    use super::*;

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("a//b/./c/../d"), "a/b/c/d");
        assert_eq!(sanitize_key("/.."), "");
    }

    #[test]
    fn test_image_object_key_keeps_extension() {
        let key = image_object_key("Screen Shot.JPG");
        assert!(key.ends_with(".jpg"));
        assert_eq!(key.len(), 36 + 4);
    }

    #[test]
    fn test_image_object_key_without_usable_extension() {
        assert!(image_object_key("noext").ends_with(".bin"));
        assert!(image_object_key("weird.p$g").ends_with(".bin"));
    }

    #[test]
    fn test_image_object_keys_are_unique() {
        assert_ne!(image_object_key("a.png"), image_object_key("a.png"));
    }
}

#[cfg(test)]
mod s3_tests {
    use super::*;

    #[tokio::test]
    async fn test_s3_public_url_format() {
        let client = S3StorageClient::new(
            "http://localhost:9000",
            "us-east-1",
            "testkey",
            "testsecret",
            "training-images",
            "https://project.supabase.co/storage/v1/object/public/",
        )
        .await;

        assert_eq!(
            client.public_url("abc.png"),
            "https://project.supabase.co/storage/v1/object/public/training-images/abc.png"
        );
    }
}
