//! Owns one loaded plugin: its capability set, its open/registered state
//! machine, and the route table built from its `on_routes` declaration.

use std::collections::HashMap;

use hosterr::HostError;
use hostproto::{RegisterRequest, RegisterResponse, RouteDecl, RouteRequest, RouteResponse};
use plugcard::loader::Plugin;
use routeforge::CompiledMatcher;

pub const ON_OPEN: &str = "on_open";
pub const ON_CLOSE: &str = "on_close";
pub const ON_REGISTER: &str = "on_register";
pub const ON_ROUTES: &str = "on_routes";
pub const VERSION_ATTR: &str = "__version__";
pub const DOC_ATTR: &str = "__doc__";

/// Which of the known lifecycle names a loaded plugin exports. Populated
/// once at load time; every later check is a boolean field read rather than
/// a fresh FFI symbol lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct PluginCapabilities {
    pub has_on_open: bool,
    pub has_on_close: bool,
    pub has_on_register: bool,
    pub has_on_routes: bool,
    pub has_version: bool,
    pub has_doc: bool,
}

impl PluginCapabilities {
    fn reflect(plugin: &Plugin) -> Self {
        Self {
            has_on_open: plugin.find_method(ON_OPEN).is_some(),
            has_on_close: plugin.find_method(ON_CLOSE).is_some(),
            has_on_register: plugin.find_method(ON_REGISTER).is_some(),
            has_on_routes: plugin.find_method(ON_ROUTES).is_some(),
            has_version: plugin.find_method(VERSION_ATTR).is_some(),
            has_doc: plugin.find_method(DOC_ATTR).is_some(),
        }
    }
}

/// One route contributed by the plugin's `on_routes` hook.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: String,
    pub path: String,
    pub handler: String,
    pub matcher: CompiledMatcher,
}

/// Owns a loaded plugin and its lifecycle state.
///
/// `opened`/`registered`/`closing` form the state machine from the
/// component design: `open()` and `close()` happen exactly once each, in
/// serial, around the serving window; they are not safe to call
/// concurrently with each other.
pub struct PluginHandle {
    module_name: String,
    plugin: Plugin,
    caps: PluginCapabilities,
    opened: bool,
    closing: bool,
    registered: bool,
    routes: Vec<Route>,
}

impl PluginHandle {
    /// Load a plugin's dynamic library and reflect over its capability set.
    ///
    /// # Safety
    /// `path` must point to a valid plugcard plugin built with
    /// `export_plugin!()` (see `plugcard::loader::Plugin::load`).
    pub unsafe fn load(
        module_name: impl Into<String>,
        path: impl AsRef<std::path::Path>,
    ) -> Result<Self, HostError> {
        let module_name = module_name.into();
        let plugin = unsafe { Plugin::load(path) }.map_err(|e| HostError::CallbackRuntimeError {
            module: module_name.clone(),
            callback: "load".to_string(),
            cause: e.to_string(),
        })?;
        let caps = PluginCapabilities::reflect(&plugin);
        Ok(Self {
            module_name,
            plugin,
            caps,
            opened: false,
            closing: false,
            registered: false,
            routes: Vec::new(),
        })
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn capabilities(&self) -> PluginCapabilities {
        self.caps
    }

    pub fn opened(&self) -> bool {
        self.opened
    }

    pub fn registered(&self) -> bool {
        self.registered
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn version(&self) -> Option<String> {
        if !self.caps.has_version {
            return None;
        }
        self.plugin.call::<(), String>(VERSION_ATTR, &()).ok()
    }

    pub fn doc(&self) -> Option<String> {
        if !self.caps.has_doc {
            return None;
        }
        self.plugin.call::<(), String>(DOC_ATTR, &()).ok()
    }

    fn runtime_error(&self, callback: &str, cause: impl std::fmt::Display) -> HostError {
        HostError::CallbackRuntimeError {
            module: self.module_name.clone(),
            callback: callback.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Opens the plugin: runs `on_open` if present, then builds the route
    /// table from `on_routes` if present. Fails if already opened.
    pub fn open(&mut self) -> Result<(), HostError> {
        if self.opened || self.closing {
            return Err(HostError::CallbackInvalidState {
                module: self.module_name.clone(),
                callback: ON_OPEN.to_string(),
                detail: "already opened".to_string(),
            });
        }

        if self.caps.has_on_open {
            self.plugin
                .call::<(), ()>(ON_OPEN, &())
                .map_err(|e| self.runtime_error(ON_OPEN, e))?;
        }

        if self.caps.has_on_routes {
            let decls = self
                .plugin
                .call::<(), Vec<RouteDecl>>(ON_ROUTES, &())
                .map_err(|e| HostError::CallbackInvalidReturnValue {
                    module: self.module_name.clone(),
                    callback: ON_ROUTES.to_string(),
                    detail: e.to_string(),
                })?;

            let mut routes = Vec::with_capacity(decls.len());
            for decl in decls {
                if decl.method.trim().is_empty() || decl.handler.trim().is_empty() {
                    return Err(HostError::CallbackInvalidReturnValue {
                        module: self.module_name.clone(),
                        callback: ON_ROUTES.to_string(),
                        detail: format!("malformed route declaration: {decl:?}"),
                    });
                }
                let matcher =
                    CompiledMatcher::compile(&decl.path).map_err(|e| HostError::Template {
                        template: decl.path.clone(),
                        reason: e.to_string(),
                    })?;
                routes.push(Route {
                    method: decl.method.trim().to_uppercase(),
                    path: decl.path,
                    handler: decl.handler,
                    matcher,
                });
            }
            self.routes = routes;
        }

        self.opened = true;
        Ok(())
    }

    /// Closes the plugin. `opened` flips to `false` only once `on_close`
    /// (if present) returns cleanly; a failing callback leaves `opened`
    /// true so a retry of `close()` remains possible (see design notes).
    pub fn close(&mut self) -> Result<(), HostError> {
        if !self.opened || self.closing {
            return Err(HostError::CallbackInvalidState {
                module: self.module_name.clone(),
                callback: ON_CLOSE.to_string(),
                detail: "not opened".to_string(),
            });
        }

        self.closing = true;
        if self.caps.has_on_close {
            if let Err(e) = self.plugin.call::<(), ()>(ON_CLOSE, &()) {
                self.closing = false;
                return Err(self.runtime_error(ON_CLOSE, e));
            }
        }
        self.closing = false;
        self.opened = false;
        Ok(())
    }

    /// Runs `on_register` with the unpacked register arguments. If the
    /// plugin does not export `on_register`, returns `CallbackNotFound` so
    /// the caller (the servicer's `Register` RPC) can map that to the
    /// wire-level `NotFoundRegisterFunction` code rather than a hard error.
    pub fn on_register(&mut self, args: RegisterRequest) -> Result<RegisterResponse, HostError> {
        if self.registered {
            return Err(HostError::CallbackInvalidState {
                module: self.module_name.clone(),
                callback: ON_REGISTER.to_string(),
                detail: "already registered".to_string(),
            });
        }
        if !self.caps.has_on_register {
            return Err(HostError::CallbackNotFound {
                module: self.module_name.clone(),
                callback: ON_REGISTER.to_string(),
            });
        }

        let response = self
            .plugin
            .call::<RegisterRequest, RegisterResponse>(ON_REGISTER, &args)
            .map_err(|e| self.runtime_error(ON_REGISTER, e))?;
        self.registered = true;
        Ok(response)
    }

    /// Resolves `(method, path)` against the route table built at `open()`
    /// time. First match wins; the incoming method is uppercase-folded.
    pub fn get_route(&self, method: &str, path: &str) -> Result<(&Route, HashMap<String, String>), HostError> {
        let method_upper = method.to_uppercase();
        for route in &self.routes {
            if route.method != method_upper {
                continue;
            }
            if let Some(vars) = route.matcher.matches(path) {
                return Ok((route, vars));
            }
        }
        Err(HostError::NotFoundRoute {
            method: method_upper,
            path: path.to_string(),
        })
    }

    /// Invokes a resolved route's handler by name.
    pub fn call_handler(&self, handler: &str, req: RouteRequest) -> Result<RouteResponse, HostError> {
        self.plugin
            .call::<RouteRequest, RouteResponse>(handler, &req)
            .map_err(|e| self.runtime_error(handler, e))
    }
}
