//! Client handle error types.

use std::time::Duration;

use thiserror::Error;

use benchgrid_ops::OpError;
use benchgrid_remote::RemoteError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot generate {file} on {host}: {detail}")]
    ConfigGeneration {
        host: String,
        file: &'static str,
        detail: String,
    },

    #[error("requested {requested} hardware threads but only {available} are available")]
    Capacity { requested: usize, available: usize },

    #[error("no ublk device appeared on {host} within {waited:?}")]
    DeviceTimeout { host: String, waited: Duration },

    #[error("client {host} has no address for block device {index}")]
    NoDeviceAddress { host: String, index: usize },

    #[error("host operation failed: {0}")]
    Op(#[from] OpError),

    #[error("remote channel error: {0}")]
    Remote(#[from] RemoteError),
}

pub type ClientResult<T> = Result<T, ClientError>;
