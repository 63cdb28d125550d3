//! Unified error type for the renderer, capture, and audio subsystems.

/// Crate-wide error enum. Variants carry a human-readable message rather
/// than wrapping every foreign error type; the boundaries where external
/// crates fail (wgpu, nokhwa, cpal) convert via [`ResultExt::context`].
#[derive(Debug, thiserror::Error)]
pub enum RetroError {
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Surface error: {0}")]
    Surface(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Renderer not initialized")]
    NotInitialized,

    #[error("Render thread already running")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Generic(String),
}

pub type RetroResult<T> = Result<T, RetroError>;

impl From<String> for RetroError {
    fn from(msg: String) -> Self {
        RetroError::Generic(msg)
    }
}

impl From<&str> for RetroError {
    fn from(msg: &str) -> Self {
        RetroError::Generic(msg.to_string())
    }
}

/// Attach a message to any displayable error while converting it.
pub trait ResultExt<T> {
    fn context(self, msg: &str) -> RetroResult<T>;
    fn with_context<F: FnOnce() -> String>(self, f: F) -> RetroResult<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn context(self, msg: &str) -> RetroResult<T> {
        self.map_err(|e| RetroError::Generic(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> RetroResult<T> {
        self.map_err(|e| RetroError::Generic(format!("{}: {}", f(), e)))
    }
}

/// Turn an absent value into an error with a message.
pub trait OptionExt<T> {
    fn ok_or_err(self, msg: &str) -> RetroResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_err(self, msg: &str) -> RetroResult<T> {
        self.ok_or_else(|| RetroError::Generic(msg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            RetroError::Gpu("device lost".to_string()).to_string(),
            "GPU error: device lost"
        );
        assert_eq!(
            RetroError::Capture("no camera".to_string()).to_string(),
            "Capture failed: no camera"
        );
        assert_eq!(
            RetroError::NotInitialized.to_string(),
            "Renderer not initialized"
        );
    }

    #[test]
    fn test_from_string() {
        let err: RetroError = "something broke".into();
        assert_eq!(err.to_string(), "something broke");

        let err: RetroError = String::from("owned message").into();
        assert_eq!(err.to_string(), "owned message");
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: RetroError = io.into();
        assert!(matches!(err, RetroError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_result_context() {
        let ok: Result<u32, std::fmt::Error> = Ok(7);
        assert_eq!(ok.context("unused").unwrap(), 7);

        let failed: Result<u32, &str> = Err("timed out");
        let err = failed.context("opening stream").unwrap_err();
        assert_eq!(err.to_string(), "opening stream: timed out");
    }

    #[test]
    fn test_result_with_context() {
        let failed: Result<(), &str> = Err("bad index");
        let err = failed
            .with_context(|| format!("device {}", 3))
            .unwrap_err();
        assert_eq!(err.to_string(), "device 3: bad index");
    }

    #[test]
    fn test_option_ext() {
        let present = Some(5).ok_or_err("unused");
        assert_eq!(present.unwrap(), 5);

        let absent: Option<u32> = None;
        let err = absent.ok_or_err("no capture devices found").unwrap_err();
        assert_eq!(err.to_string(), "no capture devices found");
    }
}
