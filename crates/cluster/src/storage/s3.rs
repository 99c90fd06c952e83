//! Blob storage in an S3 bucket.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use super::{validate_key, BlobStorage, StorageError};

pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl BlobStorage for S3Storage {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        validate_key(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("put s3://{}/{key}: {e}", self.bucket)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                if e.as_service_error().is_some_and(|svc| svc.is_no_such_key()) {
                    return Ok(None);
                }
                return Err(StorageError::Backend(format!(
                    "get s3://{}/{key}: {e}",
                    self.bucket
                )));
            }
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(format!("read s3://{}/{key}: {e}", self.bucket)))?;
        Ok(Some(data.into_bytes().to_vec()))
    }
}
