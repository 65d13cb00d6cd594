//! Docker daemon access using bollard.
//!
//! The event subscription and the log streams share one client. It connects
//! using the default method (Unix socket on Linux/macOS, named pipe on
//! Windows, or `DOCKER_HOST` when set).

mod events;
mod logs;

use bollard::Docker;

pub use events::DockerEventSource;
pub use logs::DockerLogSource;

pub fn connect() -> Result<Docker, bollard::errors::Error> {
    Docker::connect_with_local_defaults()
}
