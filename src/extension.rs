//! Capability extensions
//!
//! An [`Extension`] attaches behavior to a completed [`Rule`] without
//! changing its structural identity. Concrete providers are registered
//! process-wide under the capabilities they answer and the grammar type
//! they extend; [`Rule::as_ext`] resolves the unique eligible provider,
//! constructs it once per rule instance and binds it to its base.
//!
//! Resolution is exact about multiplicity: zero eligible providers and
//! more than one are both hard errors, reported the same way on every
//! call and never cached.

use crate::error::ResolveError;
use crate::location::Location;
use crate::rule::{Metadata, Rule};
use crate::trace::log_debug;
use hashbrown::HashMap;
use std::any::{self, Any};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock, RwLock};

// ============================================================================
// Capability identifiers
// ============================================================================

/// Identifies a capability by the Rust type that names it
///
/// Usually constructed from a trait object type:
/// `CapabilityId::of::<dyn Renders>()`. Two ids are equal when they name
/// the same type.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityId {
    id: any::TypeId,
    name: &'static str,
}

impl CapabilityId {
    /// The capability named by type `T`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: any::TypeId::of::<T>(),
            name: any::type_name::<T>(),
        }
    }

    /// Human-readable name of the capability type
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for CapabilityId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CapabilityId {}

impl Hash for CapabilityId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ============================================================================
// Extension trait
// ============================================================================

/// Bind-once holder of an extension's base rule
///
/// Every provider embeds one and returns it from
/// [`Extension::anchor`]; the resolver binds it exactly once.
#[derive(Default)]
pub struct ExtensionAnchor {
    base: OnceLock<Rule>,
}

impl ExtensionAnchor {
    /// An unbound anchor
    pub const fn new() -> Self {
        Self {
            base: OnceLock::new(),
        }
    }

    /// Bind the base rule; fails if already bound
    pub fn bind(&self, base: Rule) -> Result<(), ResolveError> {
        self.base.set(base).map_err(|_| ResolveError::AlreadyBound)
    }

    /// The bound base rule; fails if unbound
    pub fn base(&self) -> Result<&Rule, ResolveError> {
        self.base.get().ok_or(ResolveError::Unbound)
    }

    /// Whether a base rule has been bound
    #[inline]
    pub fn is_bound(&self) -> bool {
        self.base.get().is_some()
    }
}

/// A capability overlay bound 1:1 to a base [`Rule`]
///
/// Implementors supply the anchor and downcast hook; every structural
/// query delegates to the base.
pub trait Extension: Send + Sync + 'static {
    /// The holder of this extension's base rule
    fn anchor(&self) -> &ExtensionAnchor;

    /// Self as [`Any`], for downcasting to the concrete provider
    fn as_any(&self) -> &dyn Any;

    /// The bound base rule
    fn base(&self) -> Result<&Rule, ResolveError> {
        self.anchor().base()
    }

    /// The base rule's positional snapshot
    fn metadata(&self) -> Result<Arc<Metadata>, ResolveError> {
        Ok(self.base()?.metadata().clone())
    }

    /// The base rule's start position
    fn location(&self) -> Result<Location, ResolveError> {
        Ok(self.base()?.location())
    }

    /// The base rule's next sibling
    fn next_token(&self) -> Result<Option<Rule>, ResolveError> {
        Ok(self.base()?.next_token())
    }

    /// The base rule's previous sibling
    fn previous_token(&self) -> Result<Option<Rule>, ResolveError> {
        Ok(self.base()?.previous_token())
    }

    /// Resolve another capability on the base rule
    fn as_ext(&self, capability: CapabilityId) -> Result<Arc<dyn Extension>, ResolveError> {
        self.base()?.as_ext(capability)
    }
}

impl dyn Extension {
    /// Convert the base rule through the unique converter producing `T`
    pub fn to<T: 'static>(&self) -> Result<T, ResolveError> {
        self.base()?.to::<T>()
    }

    /// Downcast to the concrete provider type
    pub fn downcast_ref<T: Extension>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

// ============================================================================
// Provider registrations
// ============================================================================

/// Constructor for a provider instance
pub type ExtensionFactory = Arc<dyn Fn() -> Result<Arc<dyn Extension>, String> + Send + Sync>;

#[derive(Clone)]
enum ProviderConstructor {
    Factory(ExtensionFactory),
    Cases(HashMap<String, ExtensionFactory>),
}

/// A registered concrete provider
///
/// Declares the capabilities the provider answers, the grammar type it
/// extends (matching any subtype) and how to construct an instance.
#[derive(Clone)]
pub struct ProviderRegistration {
    name: String,
    extends: String,
    capabilities: Vec<CapabilityId>,
    constructor: ProviderConstructor,
}

/// Start a registration for provider type `P` extending grammar type
/// `extends`
///
/// `P` itself is registered as the first answered capability; add trait
/// capabilities with [`ProviderRegistration::capability`].
pub fn provider<P: Extension + Default>(name: &str, extends: &str) -> ProviderRegistration {
    ProviderRegistration {
        name: name.to_string(),
        extends: extends.to_string(),
        capabilities: vec![CapabilityId::of::<P>()],
        constructor: ProviderConstructor::Factory(Arc::new(|| {
            Ok(Arc::new(P::default()) as Arc<dyn Extension>)
        })),
    }
}

impl ProviderRegistration {
    /// Declare another capability this provider answers
    pub fn capability(mut self, capability: CapabilityId) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Replace the constructor with a fallible factory
    pub fn with_factory(mut self, factory: ExtensionFactory) -> Self {
        self.constructor = ProviderConstructor::Factory(factory);
        self
    }

    /// Replace the constructor with a per-case factory map
    ///
    /// Used when the extended type is a variant: the instance for a rule
    /// is built by the factory mapped to the rule's active case type name.
    pub fn with_cases(mut self, cases: HashMap<String, ExtensionFactory>) -> Self {
        self.constructor = ProviderConstructor::Cases(cases);
        self
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Process-wide table of provider registrations
#[derive(Default)]
pub struct ExtensionRegistry {
    providers: Vec<ProviderRegistration>,
}

impl ExtensionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration; rejects duplicate provider names
    pub fn register(&mut self, registration: ProviderRegistration) -> bool {
        if self.providers.iter().any(|p| p.name == registration.name) {
            return false;
        }
        log_debug!("registering extension provider '{}'", registration.name);
        self.providers.push(registration);
        true
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no providers are registered
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Remove all registrations
    pub fn clear(&mut self) {
        self.providers.clear();
    }

    fn providers(&self) -> &[ProviderRegistration] {
        &self.providers
    }
}

static EXTENSIONS: OnceLock<RwLock<ExtensionRegistry>> = OnceLock::new();

fn global() -> &'static RwLock<ExtensionRegistry> {
    EXTENSIONS.get_or_init(|| RwLock::new(ExtensionRegistry::new()))
}

/// Register a provider in the process-wide registry
///
/// Returns `false` if a provider with the same name is already present.
pub fn register_extension(registration: ProviderRegistration) -> bool {
    global().write().unwrap().register(registration)
}

/// Number of providers in the process-wide registry
pub fn extension_count() -> usize {
    global().read().unwrap().len()
}

/// Remove all providers from the process-wide registry
///
/// Intended for test isolation.
pub fn clear_extensions() {
    global().write().unwrap().clear();
}

// ============================================================================
// Resolution
// ============================================================================

/// Key for a rule's per-instance extension cache
///
/// Every resolved instance is cached under its provider index as well as
/// each capability it was requested through, so two capabilities answered
/// by one provider share an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ExtensionKey {
    Capability(CapabilityId),
    Provider(usize),
}

pub(crate) fn resolve(
    rule: &Rule,
    capability: CapabilityId,
) -> Result<Arc<dyn Extension>, ResolveError> {
    // The per-instance lock serializes first access; the registry lock is
    // only ever taken inside it.
    let mut cache = rule.extensions_cache().lock().unwrap();
    if let Some(existing) = cache.get(&ExtensionKey::Capability(capability)) {
        return Ok(existing.clone());
    }

    let grammar = rule.grammar();
    let rule_type = rule.token_type();
    let registry = global().read().unwrap();

    let mut hits = Vec::new();
    for (index, candidate) in registry.providers().iter().enumerate() {
        if !candidate.capabilities.contains(&capability) {
            continue;
        }
        let extends = match grammar.type_by_name(&candidate.extends) {
            Some(id) => id,
            None => continue,
        };
        if grammar.is_subtype(rule_type, extends) {
            hits.push(index);
        }
    }

    if hits.is_empty() {
        return Err(ResolveError::CapabilityNotFound {
            capability: capability.name().to_string(),
            rule_type: rule.type_name().to_string(),
        });
    }
    if hits.len() > 1 {
        return Err(ResolveError::AmbiguousCapability {
            capability: capability.name().to_string(),
            candidates: hits
                .iter()
                .map(|&i| registry.providers()[i].name.clone())
                .collect(),
        });
    }

    let index = hits[0];

    // Structural dedup: another capability may already have constructed
    // this provider for this rule instance.
    if let Some(existing) = cache.get(&ExtensionKey::Provider(index)).cloned() {
        cache.insert(ExtensionKey::Capability(capability), existing.clone());
        return Ok(existing);
    }

    let registration = &registry.providers()[index];
    let factory = match &registration.constructor {
        ProviderConstructor::Factory(factory) => factory.clone(),
        ProviderConstructor::Cases(cases) => {
            let case_name = rule
                .active_case()
                .map(|case| case.type_name().to_string())
                .ok_or_else(|| ResolveError::Instantiation {
                    what: format!(
                        "provider '{}' for '{}'",
                        registration.name,
                        rule.type_name()
                    ),
                    reason: "case-mapped provider applied to a non-variant rule".to_string(),
                })?;
            cases
                .get(&case_name)
                .cloned()
                .ok_or_else(|| ResolveError::Instantiation {
                    what: format!(
                        "provider '{}' for '{}'",
                        registration.name,
                        rule.type_name()
                    ),
                    reason: format!("no factory mapped for case '{}'", case_name),
                })?
        }
    };

    let extension = factory().map_err(|reason| ResolveError::Instantiation {
        what: format!(
            "provider '{}' for capability '{}'",
            registration.name,
            capability.name()
        ),
        reason,
    })?;
    extension.anchor().bind(rule.clone())?;
    log_debug!(
        "resolved capability '{}' on {} via provider '{}'",
        capability.name(),
        rule.tag(),
        registration.name
    );

    cache.insert(ExtensionKey::Provider(index), extension.clone());
    cache.insert(ExtensionKey::Capability(capability), extension.clone());
    Ok(extension)
}
