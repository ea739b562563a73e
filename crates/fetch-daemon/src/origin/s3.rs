use std::fmt;
use std::time::Duration;

use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::Client;
use tokio::runtime::Handle;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, trace};

use fetch_core::OriginError;

use super::{Origin, OriginObject};

/// Origin backed by an S3-compatible bucket
///
/// `get` drives the SDK on the runtime behind `handle` and bridges the body
/// into a blocking reader, so it must be called from outside that runtime
/// (the store's worker threads).
pub struct S3Origin {
    client: Client,
    bucket: String,
    timeout: Option<Duration>,
    handle: Handle,
}

impl fmt::Debug for S3Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Origin")
            .field("bucket", &self.bucket)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl S3Origin {
    /// Build a client from the environment's AWS configuration
    pub async fn connect(
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
        force_path_style: bool,
        timeout: Option<Duration>,
    ) -> Self {
        let mut loader = aws_config::from_env();
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        if let Some(endpoint) = &endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let config = S3ConfigBuilder::from(&sdk_config)
            .force_path_style(force_path_style)
            .build();

        Self::with_client(Client::from_conf(config), bucket, timeout, Handle::current())
    }

    pub fn with_client(
        client: Client,
        bucket: impl Into<String>,
        timeout: Option<Duration>,
        handle: Handle,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            timeout,
            handle,
        }
    }

    fn classify(&self, name: &str, err: SdkError<GetObjectError>) -> OriginError {
        if let SdkError::ServiceError(service_err) = &err {
            if service_err.err().is_no_such_key() || service_err.raw().status().as_u16() == 404 {
                return OriginError::NotFound(name.to_string());
            }
        }

        debug!(
            "s3 origin: GetObject s3://{}/{} failed: {}",
            self.bucket,
            name,
            DisplayErrorContext(&err)
        );
        OriginError::Remote(format!(
            "s3://{}/{}: {}",
            self.bucket,
            name,
            DisplayErrorContext(&err)
        ))
    }
}

impl Origin for S3Origin {
    fn get(&self, name: &str) -> Result<OriginObject, OriginError> {
        trace!("s3 origin: fetching s3://{}/{}", self.bucket, name);
        let request = self.client.get_object().bucket(&self.bucket).key(name).send();

        let response = self.handle.block_on(async {
            let result = match self.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, request).await {
                    Ok(result) => result,
                    Err(_) => {
                        return Err(OriginError::Remote(format!(
                            "s3://{}/{}: timed out after {:?}",
                            self.bucket, name, timeout
                        )))
                    }
                },
                None => request.await,
            };
            result.map_err(|err| self.classify(name, err))
        })?;

        let size = response
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| {
                OriginError::Remote(format!(
                    "s3://{}/{}: response has no content length",
                    self.bucket, name
                ))
            })?;

        let reader = Box::pin(response.body.into_async_read());
        let body = SyncIoBridge::new_with_handle(reader, self.handle.clone());
        Ok(OriginObject::new(size, body))
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
