pub type LivecapResult<T> = Result<T, LivecapError>;

#[derive(thiserror::Error, Debug)]
pub enum LivecapError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("container resolution error: {0}")]
    ContainerResolution(String),

    #[error("codec unavailable: {0}")]
    CodecUnavailable(String),

    #[error("codec open error: {0}")]
    CodecOpen(String),

    #[error("file i/o error: {0}")]
    FileIo(String),

    #[error("conversion error: {0}")]
    Conversion(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LivecapError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn container_resolution(msg: impl Into<String>) -> Self {
        Self::ContainerResolution(msg.into())
    }

    pub fn codec_unavailable(msg: impl Into<String>) -> Self {
        Self::CodecUnavailable(msg.into())
    }

    pub fn codec_open(msg: impl Into<String>) -> Self {
        Self::CodecOpen(msg.into())
    }

    pub fn file_io(msg: impl Into<String>) -> Self {
        Self::FileIo(msg.into())
    }

    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            LivecapError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            LivecapError::container_resolution("x")
                .to_string()
                .contains("container resolution error:")
        );
        assert!(
            LivecapError::codec_unavailable("x")
                .to_string()
                .contains("codec unavailable:")
        );
        assert!(
            LivecapError::codec_open("x")
                .to_string()
                .contains("codec open error:")
        );
        assert!(LivecapError::file_io("x").to_string().contains("file i/o error:"));
        assert!(
            LivecapError::conversion("x")
                .to_string()
                .contains("conversion error:")
        );
        assert!(LivecapError::encode("x").to_string().contains("encode error:"));
        assert!(LivecapError::capture("x").to_string().contains("capture error:"));
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = LivecapError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
