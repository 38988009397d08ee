//! Route authorization policy
//!
//! A static, ordered table of `(path patterns, method) → access` rules. The
//! first matching rule decides; requests no rule matches get the default.
//! Only two requirements exist: `public` and `authenticated`.

use crate::config::PolicyConfig;
use crate::identity::SecurityContext;
use crate::router::{pattern, PathPattern, RouterError};
use hyper::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authorization errors
#[derive(Error, Debug)]
pub enum AuthzError {
    #[error("Authentication required for {method} {path}")]
    Unauthenticated { method: Method, path: String },

    #[error("Invalid policy rule: {0}")]
    InvalidRule(String),
}

impl From<RouterError> for AuthzError {
    fn from(e: RouterError) -> Self {
        AuthzError::InvalidRule(e.to_string())
    }
}

/// Requirement a rule places on matching requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    #[default]
    Public,
    Authenticated,
}

/// A single policy rule
#[derive(Debug, Clone)]
pub struct PolicyRule {
    patterns: Vec<PathPattern>,
    method: Option<Method>,
    access: Access,
}

impl PolicyRule {
    pub fn new<S: AsRef<str>>(
        paths: &[S],
        method: Option<Method>,
        access: Access,
    ) -> Result<Self, AuthzError> {
        Ok(Self {
            patterns: pattern::parse_all(paths)?,
            method,
            access,
        })
    }

    fn applies(&self, method: &Method, path: &str) -> bool {
        self.method.as_ref().map_or(true, |m| m == method)
            && self.patterns.iter().any(|p| p.matches(path))
    }
}

/// Ordered access rules for request paths
#[derive(Debug, Clone, Default)]
pub struct RouteAuthorizationPolicy {
    rules: Vec<PolicyRule>,
    default: Access,
}

impl RouteAuthorizationPolicy {
    pub fn new(rules: Vec<PolicyRule>, default: Access) -> Self {
        Self { rules, default }
    }

    pub fn from_config(config: &PolicyConfig) -> Result<Self, AuthzError> {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                let method = rule
                    .method
                    .as_deref()
                    .map(|m| {
                        Method::from_bytes(m.to_uppercase().as_bytes())
                            .map_err(|_| AuthzError::InvalidRule(format!("Invalid method '{}'", m)))
                    })
                    .transpose()?;
                PolicyRule::new(&rule.paths, method, rule.access)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(rules, config.default))
    }

    /// Requirement for `method` on `path`
    pub fn requirement(&self, method: &Method, path: &str) -> Access {
        self.rules
            .iter()
            .find(|rule| rule.applies(method, path))
            .map_or(self.default, |rule| rule.access)
    }

    /// Allow the request unless it needs authentication and has no context
    pub fn authorize(
        &self,
        method: &Method,
        path: &str,
        context: Option<&SecurityContext>,
    ) -> Result<(), AuthzError> {
        match (self.requirement(method, path), context) {
            (Access::Public, _) | (Access::Authenticated, Some(_)) => Ok(()),
            (Access::Authenticated, None) => Err(AuthzError::Unauthenticated {
                method: method.clone(),
                path: path.to_string(),
            }),
        }
    }
}
