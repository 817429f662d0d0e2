//! Container image references.

use serde::{Deserialize, Serialize};

/// Container image used for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    reference: String,

    /// When the backend should pull the image.
    pub pull_policy: ImagePullPolicy,
}

impl ContainerImage {
    /// Creates an image from a reference such as `saltstack/salt:3006`.
    ///
    /// ```
    /// use saltmm_orchestrator::container::ContainerImage;
    ///
    /// let image = ContainerImage::new("saltstack/salt:3006");
    /// assert_eq!(image.name(), "saltstack/salt");
    /// assert_eq!(image.tag(), Some("3006"));
    /// ```
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            pull_policy: ImagePullPolicy::default(),
        }
    }

    /// Sets the pull policy.
    pub fn with_pull_policy(mut self, policy: ImagePullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    /// Returns the full image reference.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Returns the repository part of the reference.
    pub fn name(&self) -> &str {
        let without_digest = self.reference.split('@').next().unwrap_or(&self.reference);
        // A colon before the last slash belongs to a registry port.
        match without_digest.rfind(':') {
            Some(idx) if !without_digest[idx..].contains('/') => &without_digest[..idx],
            _ => without_digest,
        }
    }

    /// Returns the tag, if any.
    pub fn tag(&self) -> Option<&str> {
        let without_digest = self.reference.split('@').next()?;
        let name_len = self.name().len();
        without_digest.get(name_len + 1..).filter(|t| !t.is_empty())
    }
}

impl From<&str> for ContainerImage {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContainerImage {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Image pull policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImagePullPolicy {
    /// Always pull before deploying.
    Always,

    /// Pull only when the image is missing locally.
    #[default]
    IfNotPresent,

    /// Never pull; the image must already exist.
    Never,
}

impl ImagePullPolicy {
    /// Parses a compose `pull_policy` value.
    pub fn from_compose_str(s: &str) -> Option<Self> {
        match s {
            "always" => Some(Self::Always),
            "missing" | "if_not_present" => Some(Self::IfNotPresent),
            "never" => Some(Self::Never),
            _ => None,
        }
    }

    /// Returns the compose `pull_policy` value.
    pub fn as_compose_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::IfNotPresent => "missing",
            Self::Never => "never",
        }
    }
}
