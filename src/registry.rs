//! Function registry.
//!
//! The registry maps canonical function names to descriptors with native
//! addresses. It is an explicit, dependency-injected object: the compiler
//! holds a shared handle instead of reaching into process-global state, so
//! its lifetime is visible at every use site. Registration is the single
//! mechanism by which any function, scalar builtin or vector kernel alike,
//! becomes callable from compiled code.

use hashbrown::HashMap;

use crate::function::FunctionDesc;

/// Name → descriptor table. Once registered, a descriptor's address and
/// signature are immutable for the registry's lifetime; generated code may
/// cache resolved addresses across compilations.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    funcs: HashMap<String, FunctionDesc>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor. A duplicate name is rejected loudly: the new
    /// descriptor is discarded, the previous entry is retained, and false
    /// is returned.
    pub fn register(&mut self, mut desc: FunctionDesc) -> bool {
        desc.init();
        if self.funcs.contains_key(&desc.name) {
            log::error!("Duplicate func name:{}", desc.name);
            return false;
        }
        log::debug!("Register function:{}", desc.name);
        self.funcs.insert(desc.name.clone(), desc);
        true
    }

    /// Look up a descriptor. Lookup never mutates the table.
    pub fn get_function(&self, name: &str) -> Option<&FunctionDesc> {
        self.funcs.get(name)
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    #[test]
    fn register_then_lookup_round_trips() {
        let mut reg = FunctionRegistry::new();
        let desc = FunctionDesc::new("add_i64_i64", DType::I64, vec![DType::I64, DType::I64], 0x1234);
        assert!(reg.register(desc.clone()));

        let found = reg.get_function("add_i64_i64").expect("registered");
        assert_eq!(found.func, 0x1234);
        assert_eq!(found.arg_types, desc.arg_types);
    }

    #[test]
    fn duplicate_registration_keeps_first_entry() {
        let mut reg = FunctionRegistry::new();
        let first = FunctionDesc::new("f", DType::I64, vec![DType::I64], 0x1000);
        let second = FunctionDesc::new("f", DType::F64, vec![DType::F64], 0x2000);
        assert!(reg.register(first.clone()));
        assert!(!reg.register(second));

        let found = reg.get_function("f").expect("first entry retained");
        assert_eq!(found.func, 0x1000);
        assert_eq!(found.return_type, DType::I64);
        assert_eq!(found.arg_types, first.arg_types);
    }

    #[test]
    fn lookup_on_empty_registry_is_none() {
        let reg = FunctionRegistry::new();
        assert!(reg.get_function("missing").is_none());
        assert!(reg.is_empty());
    }
}
