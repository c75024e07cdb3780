use crate::exit_codes::ExitCode;

#[derive(Debug)]
pub enum RunError {
    InvalidInput(anyhow::Error),
    SetupFailed(anyhow::Error),
    Aborted(anyhow::Error),
    RuntimeError(anyhow::Error),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::SetupFailed(_) => ExitCode::SetupFailed,
            Self::Aborted(_) => ExitCode::Aborted,
            Self::RuntimeError(_) => ExitCode::RuntimeError,
        }
    }

    #[must_use]
    pub fn anyhow(&self) -> &anyhow::Error {
        match self {
            Self::InvalidInput(e) | Self::SetupFailed(e) | Self::Aborted(e) | Self::RuntimeError(e) => {
                e
            }
        }
    }

    /// Sorts an engine error into the exit-code taxonomy.
    pub fn from_core(err: volley_core::Error, context: &'static str) -> Self {
        use volley_core::Error as E;

        let kind = match &err {
            E::InvalidVus
            | E::InvalidIterations
            | E::InvalidDuration
            | E::InvalidRate
            | E::InvalidBurst
            | E::InvalidThreshold { .. }
            | E::InvalidTemplate { .. }
            | E::InvalidStatus(_)
            | E::InvalidStep { .. }
            | E::InvalidCredentials { .. } => Self::InvalidInput,

            E::Setup { .. } => Self::SetupFailed,
            E::Aborted => Self::Aborted,

            // A missing credentials file is a bad path, not a crash.
            E::Io(io) if io.kind() == std::io::ErrorKind::NotFound => Self::InvalidInput,
            E::Io(_) | E::Join(_) | E::Metrics(_) => Self::RuntimeError,
        };

        kind(anyhow::Error::new(err).context(context))
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.anyhow())
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.anyhow().as_ref())
    }
}
