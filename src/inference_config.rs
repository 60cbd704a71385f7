//! A global store of flags that can impact inference.
//!
//! WARNING: Currently only supports a single consistent configuration amongst threads (i.e., cannot
//! have different configurations for different inference executions in the same process).

/// The global configuration store. Its fields are expected to be accessed across the crate via the
/// global [`CONFIG`](static@CONFIG).
pub struct InferenceConfig {
    /// At a load whose defining memory access is a store to the same location, unify the loaded
    /// value with the stored value. Disabling this leaves loads constrained only by their width.
    pub unify_loads_with_defining_stores: bool,
    /// Let signed/unsigned comparison predicates bound their operands' signedness and width.
    /// Equality and inequality comparisons never carry signedness, with or without this flag.
    pub infer_signedness_from_comparisons: bool,
    /// Let division, remainder, and shift operations constrain the signedness of their result.
    /// The result-no-wider-than-inputs width relations apply regardless.
    pub infer_signedness_from_div_rem: bool,
    /// Log the full generated constraint list at debug level after a function walk.
    pub debug_print_constraints: bool,
}

impl InferenceConfig {
    /// Internal method: sets up initialization
    #[allow(static_mut_refs)]
    fn from_initialized() -> Self {
        let init = unsafe {
            INTERNAL_CONFIG_INITIALIZER
                .take()
                .expect("Should be initialized only once")
        };
        init.unwrap_or_default()
    }

    /// Initialize with the given set of overrides. Should only be called once, before any
    /// inference is run.
    #[allow(static_mut_refs)]
    pub fn initialize(overrides: Vec<ConfigOverride>) {
        let prev = unsafe { INTERNAL_CONFIG_INITIALIZER.replace(Some(overrides.into())) };
        assert!(prev.is_some(), "Performed double initialization");
        lazy_static::initialize(&CONFIG);
    }
}

/// Internal initialization detail.
static mut INTERNAL_CONFIG_INITIALIZER: Option<Option<InferenceConfig>> = Some(None);

lazy_static::lazy_static! {
    /// The global configuration store
    pub static ref CONFIG: InferenceConfig = InferenceConfig::from_initialized();
}

/// Inference configuration overrides
#[derive(Clone, Debug)]
pub enum ConfigOverride {
    DisableLoadStoreUnification,
    DisableComparisonSignednessInference,
    DisableDivRemSignednessInference,
    EnableConstraintDebugPrinting,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        InferenceConfig {
            unify_loads_with_defining_stores: true,
            infer_signedness_from_comparisons: true,
            infer_signedness_from_div_rem: true,
            debug_print_constraints: false,
        }
    }
}

impl From<Vec<ConfigOverride>> for InferenceConfig {
    fn from(v: Vec<ConfigOverride>) -> Self {
        use ConfigOverride::*;
        let mut r = InferenceConfig::default();
        for v in v {
            match v {
                DisableLoadStoreUnification => {
                    r.unify_loads_with_defining_stores = false;
                }
                DisableComparisonSignednessInference => {
                    r.infer_signedness_from_comparisons = false;
                }
                DisableDivRemSignednessInference => {
                    r.infer_signedness_from_div_rem = false;
                }
                EnableConstraintDebugPrinting => {
                    r.debug_print_constraints = true;
                }
            }
        }
        r
    }
}
