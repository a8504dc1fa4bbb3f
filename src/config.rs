//! Processor configuration: extra encode/decode options and the sampling seed.

use crate::{
    error::Result,
    status::{Status, StatusCode},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Post-processing applied to an encode or decode result.
///
/// The textual form is a colon separated list such as `"bos:eos"` or
/// `"reverse"`; an empty string clears every option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtraOptions {
    /// Prepend the `<s>` piece.
    pub bos: bool,
    /// Append the `</s>` piece.
    pub eos: bool,
    /// Reverse the piece sequence.
    pub reverse: bool,
}

impl ExtraOptions {
    #[inline]
    pub fn is_empty(&self) -> bool {
        !(self.bos || self.eos || self.reverse)
    }
}

impl FromStr for ExtraOptions {
    type Err = Status;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ans = Self::default();
        for option in s.split(':').filter(|o| !o.is_empty()) {
            match option {
                "bos" => ans.bos = true,
                "eos" => ans.eos = true,
                "reverse" => ans.reverse = true,
                _ => {
                    return Err(Status::invalid_argument(format!(
                        "option \"{option}\" is not available."
                    )))
                }
            }
        }
        Ok(ans)
    }
}

impl fmt::Display for ExtraOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let options = [
            (self.bos, "bos"),
            (self.eos, "eos"),
            (self.reverse, "reverse"),
        ];
        let names = options
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, name)| *name)
            .collect::<Vec<_>>();
        f.write_str(&names.join(":"))
    }
}

/// Settings of a [`SentencePieceProcessor`](crate::SentencePieceProcessor)
/// that are independent of the loaded model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Applied to every encode result.
    pub encode_extra_options: ExtraOptions,
    /// Applied to every decode input; only `reverse` is meaningful here.
    pub decode_extra_options: ExtraOptions,
    /// Seed for sampling; `None` seeds from the operating system.
    pub random_seed: Option<u64>,
}

impl ProcessorConfig {
    /// Returns a builder initialised with [`ProcessorConfig::default`].
    #[must_use]
    pub fn builder() -> ProcessorBuilder {
        ProcessorBuilder::default()
    }

    /// Checks that the options are meaningful for their direction.
    pub fn validate(&self) -> Result<()> {
        let decode = self.decode_extra_options;
        if decode.bos || decode.eos {
            return Err(Status::new(
                StatusCode::InvalidArgument,
                "bos and eos are not available as decode options.",
            )
            .into());
        }
        Ok(())
    }
}

/// Builder for [`ProcessorConfig`].
#[derive(Debug, Default, Clone)]
pub struct ProcessorBuilder {
    cfg: ProcessorConfig,
}

impl ProcessorBuilder {
    /// Creates a builder with [`ProcessorConfig::default`] settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn encode_extra_options(mut self, options: ExtraOptions) -> Self {
        self.cfg.encode_extra_options = options;
        self
    }

    #[must_use]
    pub fn decode_extra_options(mut self, options: ExtraOptions) -> Self {
        self.cfg.decode_extra_options = options;
        self
    }

    /// Makes sampling reproducible.
    #[must_use]
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.cfg.random_seed = Some(seed);
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<ProcessorConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
