use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::credentials::Credential;
use crate::identities::Identities;
use crate::scenario::json_path;

pub type Vars = HashMap<String, Value>;

/// Environment visible to templates as `env.NAME`, sorted by key.
pub type EnvVars = Arc<[(Arc<str>, Arc<str>)]>;

/// Builds an [`EnvVars`] from arbitrary pairs. Later duplicates win.
pub fn env_vars(pairs: impl IntoIterator<Item = (String, String)>) -> EnvVars {
    let mut map: std::collections::BTreeMap<String, String> = std::collections::BTreeMap::new();
    for (k, v) in pairs {
        map.insert(k, v);
    }
    let vars: Vec<(Arc<str>, Arc<str>)> = map
        .into_iter()
        .map(|(k, v)| (Arc::<str>::from(k), Arc::<str>::from(v)))
        .collect();
    Arc::from(vars.into_boxed_slice())
}

pub fn process_env_snapshot() -> EnvVars {
    env_vars(std::env::vars())
}

/// Read-only state shared by every virtual user: setup output, credentials, env.
#[derive(Debug, Clone, Default)]
pub struct SharedContext {
    pub vars: Vars,
    /// Variables extracted by per-user setup steps, indexed like the credentials.
    pub user_vars: Vec<Vars>,
    pub identities: Identities,
    pub env: EnvVars,
}

impl SharedContext {
    pub fn user_vars(&self, idx: usize) -> Option<&Vars> {
        self.user_vars.get(idx)
    }

    pub fn env(&self, name: &str) -> Option<&str> {
        self.env
            .binary_search_by(|(k, _)| k.as_ref().cmp(name))
            .ok()
            .map(|idx| self.env[idx].1.as_ref())
    }
}

/// Everything a template can see while one iteration runs.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub locals: &'a Vars,
    pub shared: &'a SharedContext,
    pub vu: u64,
    pub iter: u64,
    pub user: Option<&'a Credential>,
    pub peer: Option<&'a Credential>,
    /// Per-user setup variables of the acting user and of the peer.
    pub user_vars: Option<&'a Vars>,
    pub peer_vars: Option<&'a Vars>,
}

impl<'a> Scope<'a> {
    /// Resolves a placeholder name. Iteration variables shadow shared ones, which
    /// shadow built-ins. A dotted name that matches nothing directly is treated as
    /// a path into an object variable (`${login.token}`).
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.locals.get(name).or_else(|| self.shared.vars.get(name)) {
            return Some(v.clone());
        }
        if let Some(v) = self.builtin(name) {
            return Some(v);
        }

        let (head, rest) = name.split_once('.')?;
        let root = self.locals.get(head).or_else(|| self.shared.vars.get(head))?;
        json_path(root, rest).cloned()
    }

    fn builtin(&self, name: &str) -> Option<Value> {
        match name {
            "vu" => Some(Value::from(self.vu)),
            "iter" => Some(Value::from(self.iter)),
            "user.username" => self.user.map(|c| Value::from(c.username.as_str())),
            "user.password" => self.user.map(|c| Value::from(c.password.as_str())),
            "peer.username" => self.peer.map(|c| Value::from(c.username.as_str())),
            "peer.password" => self.peer.map(|c| Value::from(c.password.as_str())),
            _ => {
                if let Some(key) = name.strip_prefix("env.") {
                    return self.shared.env(key).map(Value::from);
                }
                if let Some(rest) = name.strip_prefix("user.") {
                    return self.user_vars.and_then(|vars| lookup(vars, rest));
                }
                name.strip_prefix("peer.")
                    .and_then(|rest| self.peer_vars.and_then(|vars| lookup(vars, rest)))
            }
        }
    }
}

fn lookup(vars: &Vars, name: &str) -> Option<Value> {
    if let Some(v) = vars.get(name) {
        return Some(v.clone());
    }
    let (head, rest) = name.split_once('.')?;
    json_path(vars.get(head)?, rest).cloned()
}
