use bollard::Docker;
use bollard::container::LogOutput;
use bollard::query_parameters::{LogsOptions, LogsOptionsBuilder};
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use crate::logwatch::{LogFraming, LogSource, LogSourceError};

/// Follows container stderr through the daemon's logs endpoint.
#[derive(Clone)]
pub struct DockerLogSource {
    docker: Docker,
}

impl DockerLogSource {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

impl LogSource for DockerLogSource {
    /// Bollard strips the multiplexing headers itself, what is left is plain text.
    fn framing(&self) -> LogFraming {
        LogFraming::Lines
    }

    fn open(&self, container_id: &str) -> BoxStream<'static, Result<Bytes, LogSourceError>> {
        // tail=0 skips history, follow keeps the stream open.
        let options: LogsOptions = LogsOptionsBuilder::new()
            .follow(true)
            .stderr(true)
            .stdout(false)
            .tail("0")
            .build();

        self.docker
            .logs(container_id, Some(options))
            .filter_map(|output| async move {
                match output {
                    Ok(LogOutput::StdErr { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(message))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(LogSourceError::from(e))),
                }
            })
            .boxed()
    }
}
