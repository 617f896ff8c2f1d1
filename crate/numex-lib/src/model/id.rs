use rand::seq::SliceRandom as _;
use rand::Rng;

/// Names a client picks from when none is given.
pub const CLIENT_NAMES: [&str; 10] = [
    "Alice", "Bob", "Charlie", "David", "Eve", "Frank", "Grace", "Hannah", "Ivy", "Jack",
];

/// Identifies a client in exchanges.
///
/// Chosen once at startup and kept for the whole process lifetime.
#[derive(Debug, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ClientId(String);

impl ClientId {
    /// Pick a name from [CLIENT_NAMES].
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        // CLIENT_NAMES is never empty
        let name = CLIENT_NAMES.choose(rng).copied().unwrap_or(CLIENT_NAMES[0]);

        Self(name.to_string())
    }

    /// Pick a name from [CLIENT_NAMES] with the thread-local RNG.
    pub fn pick() -> Self {
        Self::random(&mut rand::thread_rng())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
