use keygate_auth::{Claims, Role};

/// Verified claims for the current request.
///
/// Inserted into request extensions by the authentication middleware; never
/// present on requests whose token failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsContext {
    claims: Claims,
}

impl ClaimsContext {
    pub fn new(claims: Claims) -> Self {
        Self { claims }
    }

    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    pub fn roles(&self) -> &[Role] {
        &self.claims.roles
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.claims.has_role(role)
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }
}
