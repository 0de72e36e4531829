use std::error::Error;

/// Optional capability: a component that participates in
/// [`Factory::start`](crate::Factory::start).
///
/// Participation is opt-in where the concrete component type is known, via
/// [`StdEngine::auto_startable`](crate::StdEngine::auto_startable) or
/// [`SingletonRule::auto_startable`](crate::SingletonRule::auto_startable).
pub trait AutoStartable: Send + Sync {
    /// Called once when the owning factory is started.
    fn start(&self);
}

/// Optional capability: a component released when the warehouse closes.
///
/// Close hooks run in reverse check-in order; a failing hook is logged and
/// closing continues with the remaining components.
pub trait Closeable: Send + Sync {
    /// Releases the resources held by this component.
    ///
    /// # Errors
    ///
    /// Returns any error encountered while releasing; the warehouse records
    /// it and keeps closing the remaining components.
    fn close(&self) -> Result<(), Box<dyn Error + Send + Sync>>;
}
