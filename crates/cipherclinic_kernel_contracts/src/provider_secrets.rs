#![forbid(unsafe_code)]

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderSecretId {
    GoogleApiKey,
}

impl ProviderSecretId {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GoogleApiKey => "google_api_key",
        }
    }

    pub const fn all() -> &'static [Self] {
        &[Self::GoogleApiKey]
    }

    /// Environment variables checked in order when resolving the secret.
    pub const fn env_var_names(self) -> &'static [&'static str] {
        match self {
            Self::GoogleApiKey => &[
                "CIPHERCLINIC_GOOGLE_API_KEY",
                "GEMINI_API_KEY",
                "GOOGLE_API_KEY",
            ],
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "google_api_key" | "gemini_api_key" => Some(Self::GoogleApiKey),
            _ => None,
        }
    }
}
