pub mod client;
pub mod environment;
pub mod error;
pub mod janitor;

pub use client::{BollardClient, DockerClient};
pub use environment::{server_description, DockerEnvironmentAdapter, EnvironmentHandle};
pub use error::DockerEnvError;
pub use janitor::Janitor;
