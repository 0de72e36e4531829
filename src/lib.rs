//! # Runtime dependency-injection factory.
//!
//! A factory resolves requests for components by name or by class, building
//! a fully satisfied dependency graph on demand, memoizing what it built and
//! reporting precise diagnostics when resolution fails.
//!
//! The moving parts:
//!
//! - **[`Rule`]** — declares the [`Name`]s it can build and hands out an
//!   [`Engine`] per name. Rules have a priority; for any name, the rule
//!   with the smallest priority wins and the others are overridden.
//! - **[`Engine`]** — the build procedure for one name: a
//!   [`BillOfMaterials`] of dependency [`Query`]s plus a constructor from
//!   the satisfied bill to a component.
//! - **[`Warehouse`]** — memoizes built components; the first check-in for
//!   a name wins, and components are released in reverse build order on
//!   close.
//! - **[`Builder`]** — assembles rules (from code, from [`RULE_PLUGINS`],
//!   from [`Overlay`]s) and bootstraps the [`Factory`] with a fixed-point
//!   loop so rules may themselves be produced by other rules.
//! - **[`CustomizerEngine`]** — post-construction transforms applied to
//!   freshly built components, in stable priority order.
//!
//! Factories are immutable: concatenating a rule produces a new factory.
//! Components are built lazily, live for the factory's lifetime, and are
//! always handed out as [`Svc<T>`] (an [`Arc`](std::sync::Arc)).
//!
//! ## Example
//!
//! ```
//! use runtime_factory::{
//!     BillOfMaterials, Builder, Name, Query, SingleNameRule, SingletonRule, StdEngine, Svc,
//! };
//! use std::sync::Arc;
//!
//! struct Greeter {
//!     greeting: Svc<String>,
//! }
//!
//! impl Greeter {
//!     fn greet(&self, who: &str) -> String {
//!         format!("{} {}", self.greeting, who)
//!     }
//! }
//!
//! let greeting = Name::<String>::of("greeting");
//! let greeter = Name::<Greeter>::of("greeter");
//!
//! // the greeter needs the greeting component
//! let dep = Query::by_name(greeting.clone());
//! let bom = BillOfMaterials::of([dep.clone().into()]);
//! let engine = StdEngine::new(greeter.clone(), bom, move |satisfied| Greeter {
//!     greeting: satisfied.one(&dep).unwrap().into_component(),
//! });
//!
//! let mut builder = Builder::new();
//! builder.add_rule(Arc::new(SingletonRule::new(greeting, "hello".to_string())));
//! builder.add_rule(Arc::new(SingleNameRule::new(0, Arc::new(engine))));
//!
//! let factory = builder.build().unwrap();
//! let greeter: Svc<Greeter> = factory.get_component(&greeter).unwrap();
//! assert_eq!("hello world", greeter.greet("world"));
//! ```

#![deny(unsafe_code)]
#![deny(clippy::all, clippy::pedantic)]
#![warn(missing_docs)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::doc_markdown
)]

mod boxes;
mod builder;
mod component;
mod customizers;
mod engines;
mod errors;
mod factory;
mod lifecycle;
mod metrics;
mod names;
mod overlays;
mod plugins;
mod queries;
mod registry;
mod resolver;
mod rules;
mod warehouse;

pub use boxes::*;
pub use builder::*;
pub use component::*;
pub use customizers::*;
pub use engines::*;
pub use errors::*;
pub use factory::*;
pub use lifecycle::*;
pub use metrics::*;
pub use names::*;
pub use overlays::*;
pub use plugins::*;
pub use queries::*;
pub use registry::*;
pub use rules::*;
pub use warehouse::*;

#[cfg(test)]
mod tests;
