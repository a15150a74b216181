use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirageError {
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Window system query failed: {0}")]
    WindowSystem(String),

    #[error("Application catalog failed: {0}")]
    AppCatalog(String),

    #[error("Application {app} is already being streamed by client {client}")]
    AlreadyReserved { app: String, client: String },

    #[error("No streaming session for application {0}")]
    SessionNotFound(String),

    #[error("Client {client} does not hold the reservation for {app}")]
    NotOwner { app: String, client: String },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MirageError {
    pub fn window_system<T>(msg: impl Into<String>) -> Result<T> {
        Err(MirageError::WindowSystem(msg.into()))
    }
}

pub type Result<T> = std::result::Result<T, MirageError>;

#[macro_export]
macro_rules! mirage_error {
    (window_system, $($arg:tt)*) => {
        $crate::error::MirageError::WindowSystem(format!($($arg)*))
    };
    (app_catalog, $($arg:tt)*) => {
        $crate::error::MirageError::AppCatalog(format!($($arg)*))
    };
    (session_not_found, $($arg:tt)*) => {
        $crate::error::MirageError::SessionNotFound(format!($($arg)*))
    };
    (service_unavailable, $($arg:tt)*) => {
        $crate::error::MirageError::ServiceUnavailable(format!($($arg)*))
    };
    (internal, $($arg:tt)*) => {
        $crate::error::MirageError::Internal(format!($($arg)*))
    };
}
