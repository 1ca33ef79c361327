use anyhow::Result;

pub type Handler = Box<dyn Fn(&str) -> Result<HandlerResult> + Send + Sync>;

pub struct EventRoute {
    pub pattern: EventPattern,
    pub handler: Handler,
}

impl EventRoute {
    pub fn exact(id: &str, handler: impl Fn(&str) -> Result<HandlerResult> + Send + Sync + 'static) -> Self {
        Self {
            pattern: EventPattern::Exact(id.to_string()),
            handler: Box::new(handler),
        }
    }

    pub fn prefix(prefix: &str, handler: impl Fn(&str) -> Result<HandlerResult> + Send + Sync + 'static) -> Self {
        Self {
            pattern: EventPattern::Prefix(prefix.to_string()),
            handler: Box::new(handler),
        }
    }
}

pub enum EventPattern {
    Exact(String),
    Prefix(String),
}

impl EventPattern {
    pub fn matches(&self, event_id: &str) -> bool {
        match self {
            EventPattern::Exact(s) => s == event_id,
            EventPattern::Prefix(p) => event_id.starts_with(p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    Continue,
    /// The menu no longer reflects the registry.
    Rebuild,
    Quit,
}

pub struct EventRouter {
    routes: Vec<EventRoute>,
}

impl EventRouter {
    pub fn new(routes: Vec<EventRoute>) -> Self {
        Self { routes }
    }

    /// First matching route wins.
    pub fn route(&self, event_id: &str) -> Result<HandlerResult> {
        for route in &self.routes {
            if route.pattern.matches(event_id) {
                return (route.handler)(event_id);
            }
        }

        log::warn!("No route found for event: {}", event_id);
        Ok(HandlerResult::Continue)
    }
}
