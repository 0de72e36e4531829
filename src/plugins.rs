use crate::Rule;
use linkme::distributed_slice;
use std::sync::Arc;

/// The rule-source plugin registry, collected at link time.
///
/// Crates provide rules by registering a constructor on this slice;
/// [`Builder::add_plugin_rules`](crate::Builder::add_plugin_rules) (and the
/// default [`Factory::new_instance`](crate::Factory::new_instance)) picks
/// them all up into a dedicated bucket.
///
/// ## Example
///
/// ```
/// use linkme::distributed_slice;
/// use runtime_factory::{Name, Rule, SingletonRule, RULE_PLUGINS};
/// use std::sync::Arc;
///
/// #[distributed_slice(RULE_PLUGINS)]
/// static DEFAULT_GREETING: fn() -> Arc<dyn Rule> = default_greeting;
///
/// fn default_greeting() -> Arc<dyn Rule> {
///     Arc::new(SingletonRule::new(
///         Name::<String>::of("greeting"),
///         "hello".to_string(),
///     ))
/// }
///
/// fn main() {
///     assert!(!RULE_PLUGINS.is_empty());
/// }
/// ```
#[distributed_slice]
pub static RULE_PLUGINS: [fn() -> Arc<dyn Rule>];
