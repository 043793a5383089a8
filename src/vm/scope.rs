use std::collections::HashMap;

pub type ScopeId = usize;

pub const GLOBAL: ScopeId = 0;

/// Where a function starts and the scope it was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncEntry {
    pub entry: usize,
    pub scope: ScopeId,
}

#[derive(Debug, Default)]
pub struct Scope {
    vars: HashMap<String, usize>,
    funcs: HashMap<String, FuncEntry>,
    parent: Option<ScopeId>,
}

/// Scope arena. Scopes are created and dropped in call order, so releasing
/// a call is a truncate back to its scope id.
#[derive(Debug)]
pub struct Scopes {
    arena: Vec<Scope>,
}

impl Default for Scopes {
    fn default() -> Self {
        Scopes::new()
    }
}

impl Scopes {
    pub fn new() -> Self {
        Scopes { arena: vec![Scope::default()] }
    }

    pub fn push(&mut self, parent: ScopeId) -> ScopeId {
        self.arena.push(Scope { parent: Some(parent), ..Scope::default() });
        self.arena.len() - 1
    }

    /// Drop `id` and every scope created after it. The global scope stays.
    pub fn truncate(&mut self, id: ScopeId) {
        self.arena.truncate(id.max(GLOBAL + 1));
    }

    pub fn set_var(&mut self, scope: ScopeId, name: &str, addr: usize) {
        if let Some(s) = self.arena.get_mut(scope) {
            s.vars.insert(name.to_string(), addr);
        }
    }

    pub fn set_func(&mut self, scope: ScopeId, name: &str, entry: FuncEntry) {
        if let Some(s) = self.arena.get_mut(scope) {
            s.funcs.insert(name.to_string(), entry);
        }
    }

    pub fn lookup_var(&self, scope: ScopeId, name: &str) -> Option<usize> {
        self.chain(scope).find_map(|s| s.vars.get(name).copied())
    }

    pub fn lookup_func(&self, scope: ScopeId, name: &str) -> Option<FuncEntry> {
        self.chain(scope).find_map(|s| s.funcs.get(name).copied())
    }

    /// Variables bound directly in `scope`.
    pub fn vars(&self, scope: ScopeId) -> impl Iterator<Item = (&str, usize)> {
        self.arena
            .get(scope)
            .into_iter()
            .flat_map(|s| s.vars.iter().map(|(name, addr)| (name.as_str(), *addr)))
    }

    fn chain(&self, start: ScopeId) -> impl Iterator<Item = &Scope> {
        std::iter::successors(self.arena.get(start), |s| {
            s.parent.and_then(|p| self.arena.get(p))
        })
    }
}

/// One activation record. The main frame has no function and no return slot.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub scope: ScopeId,
    pub resume_ip: usize,
    pub dest_addr: Option<usize>,
    pub base: usize,
    pub size: usize,
    pub function: Option<String>,
}

impl CallFrame {
    pub fn main(size: usize) -> Self {
        CallFrame {
            scope: GLOBAL,
            resume_ip: 0,
            dest_addr: None,
            base: 0,
            size,
            function: None,
        }
    }
}
