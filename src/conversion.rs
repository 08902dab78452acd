//! Rule conversions
//!
//! A [`Conversion`] turns a completed [`Rule`] into an external value
//! type. Converters are registered process-wide under the grammar type
//! they accept; [`Rule::to`] resolves the unique converter producing the
//! requested target type, caches it per declaring production type and
//! applies it to the instance.
//!
//! Unlike extension instances, resolved converters are stateless and
//! shared: every rule of one production type uses the same converter for
//! a given target.

use crate::error::ResolveError;
use crate::rule::Rule;
use crate::trace::log_debug;
use hashbrown::HashMap;
use std::any::{self, Any};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

// ============================================================================
// Conversion trait
// ============================================================================

/// A stateless transform from a rule to an external value type
pub trait Conversion: Send + Sync + 'static {
    /// The produced value type
    type Output: Send + 'static;

    /// Transform `rule` into the target type
    fn convert(&self, rule: &Rule) -> Result<Self::Output, String>;
}

trait ErasedConversion: Send + Sync {
    fn convert_boxed(&self, rule: &Rule) -> Result<Box<dyn Any + Send>, String>;
}

struct Erased<C>(C);

impl<C: Conversion> ErasedConversion for Erased<C> {
    fn convert_boxed(&self, rule: &Rule) -> Result<Box<dyn Any + Send>, String> {
        self.0
            .convert(rule)
            .map(|value| Box::new(value) as Box<dyn Any + Send>)
    }
}

type ConverterFactory = Arc<dyn Fn() -> Result<Arc<dyn ErasedConversion>, String> + Send + Sync>;

struct ConversionRegistration {
    name: String,
    source: String,
    target: any::TypeId,
    target_name: &'static str,
    factory: ConverterFactory,
}

// ============================================================================
// Registry
// ============================================================================

static CONVERSIONS: OnceLock<RwLock<Vec<ConversionRegistration>>> = OnceLock::new();

fn table() -> &'static RwLock<Vec<ConversionRegistration>> {
    CONVERSIONS.get_or_init(|| RwLock::new(Vec::new()))
}

// Keyed by declaring type name, not grammar identity: the cache outlives
// any one grammar, and an address-based key could alias a dropped grammar.
#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    declaring: String,
    target: any::TypeId,
}

static RESOLVED: OnceLock<Mutex<HashMap<CacheKey, Arc<dyn ErasedConversion>>>> = OnceLock::new();

fn resolved() -> &'static Mutex<HashMap<CacheKey, Arc<dyn ErasedConversion>>> {
    RESOLVED.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register converter type `C` accepting grammar type `source`
///
/// The converter matches rules whose type is `source` or any of its
/// variant cases. Returns `false` if a converter with the same name is
/// already registered.
pub fn register_conversion<C: Conversion + Default>(name: &str, source: &str) -> bool {
    register_conversion_with(name, source, || Ok(C::default()))
}

/// Register a converter built by a fallible factory
pub fn register_conversion_with<C, F>(name: &str, source: &str, factory: F) -> bool
where
    C: Conversion,
    F: Fn() -> Result<C, String> + Send + Sync + 'static,
{
    let mut table = table().write().unwrap();
    if table.iter().any(|c| c.name == name) {
        return false;
    }
    log_debug!("registering conversion '{}'", name);
    table.push(ConversionRegistration {
        name: name.to_string(),
        source: source.to_string(),
        target: any::TypeId::of::<C::Output>(),
        target_name: any::type_name::<C::Output>(),
        factory: Arc::new(move || {
            factory().map(|c| Arc::new(Erased(c)) as Arc<dyn ErasedConversion>)
        }),
    });
    true
}

/// Number of registered converters
pub fn conversion_count() -> usize {
    table().read().unwrap().len()
}

/// Remove all converters and drop the resolved-converter cache
///
/// Intended for test isolation.
pub fn clear_conversions() {
    table().write().unwrap().clear();
    resolved().lock().unwrap().clear();
}

// ============================================================================
// Resolution
// ============================================================================

pub(crate) fn convert<T: 'static>(rule: &Rule) -> Result<T, ResolveError> {
    let key = CacheKey {
        declaring: rule.type_name().to_string(),
        target: any::TypeId::of::<T>(),
    };

    // The cache lock doubles as the critical section for first access:
    // search and instantiation run at most once per key.
    let converter = {
        let mut cache = resolved().lock().unwrap();
        match cache.get(&key) {
            Some(existing) => existing.clone(),
            None => {
                let converter = search::<T>(rule)?;
                cache.insert(key, converter.clone());
                converter
            }
        }
    };

    let boxed = converter
        .convert_boxed(rule)
        .map_err(|reason| ResolveError::ConversionFailed {
            from: rule.type_name().to_string(),
            to: any::type_name::<T>().to_string(),
            reason,
        })?;
    boxed
        .downcast::<T>()
        .map(|value| *value)
        .map_err(|_| ResolveError::ConversionFailed {
            from: rule.type_name().to_string(),
            to: any::type_name::<T>().to_string(),
            reason: "converter produced an unexpected value type".to_string(),
        })
}

fn search<T: 'static>(rule: &Rule) -> Result<Arc<dyn ErasedConversion>, ResolveError> {
    let grammar = rule.grammar();
    let rule_type = rule.token_type();
    let target = any::TypeId::of::<T>();
    let table = table().read().unwrap();

    let mut hits = Vec::new();
    for (index, candidate) in table.iter().enumerate() {
        if candidate.target != target {
            continue;
        }
        let source = match grammar.type_by_name(&candidate.source) {
            Some(id) => id,
            None => continue,
        };
        if grammar.is_subtype(rule_type, source) {
            hits.push(index);
        }
    }

    if hits.is_empty() {
        return Err(ResolveError::ConversionNotFound {
            from: rule.type_name().to_string(),
            to: any::type_name::<T>().to_string(),
        });
    }
    if hits.len() > 1 {
        return Err(ResolveError::AmbiguousConversion {
            from: rule.type_name().to_string(),
            to: any::type_name::<T>().to_string(),
            candidates: hits.iter().map(|&i| table[i].name.clone()).collect(),
        });
    }

    let registration = &table[hits[0]];
    let converter = (registration.factory)().map_err(|reason| ResolveError::Instantiation {
        what: format!(
            "converter '{}' from '{}' to '{}'",
            registration.name, registration.source, registration.target_name
        ),
        reason,
    })?;
    log_debug!(
        "resolved conversion '{}' for {}",
        registration.name,
        rule.tag()
    );
    Ok(converter)
}
