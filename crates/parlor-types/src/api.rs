use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims minted by the auth service (an external collaborator) and
/// validated by parlor-server at the WebSocket upgrade. The hub itself never
/// verifies tokens; it trusts the identity handed to it at attach time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}
