#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Explore,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Explore => "/explore",
        }
    }
}

/// Receives view transitions triggered by presale reads.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

/// For headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNavigation;

impl Navigator for NoNavigation {
    fn navigate(&self, route: Route) {
        log::debug!("navigation to {} ignored", route.path());
    }
}
