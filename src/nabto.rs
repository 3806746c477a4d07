//! Connector backed by the vendor's Nabto client library, loaded at runtime.
//!
//! All calls into the library block, so they run under `block_in_place`;
//! this requires the multi-threaded runtime.

use crate::config::DeviceConfig;
use crate::device::{Connector, Session};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use libloading::{Library, Symbol};
use serde_json::Value;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use tracing::{debug, info, warn};

type Status = c_int;
type Handle = *mut c_void;

const STATUS_OK: Status = 0;
const STATUS_NO_PROFILE: Status = 5;

#[cfg(windows)]
const LIBRARY_FILE: &str = "nabto_client_api.dll";
#[cfg(not(windows))]
const LIBRARY_FILE: &str = "libnabto_client_api.so";

struct Api {
    startup: unsafe extern "C" fn(*const c_char) -> Status,
    install_default_static_resources: unsafe extern "C" fn(*const c_char) -> Status,
    set_option: unsafe extern "C" fn(*const c_char, *const c_char) -> Status,
    create_profile: unsafe extern "C" fn(*const c_char, *const c_char) -> Status,
    open_session: unsafe extern "C" fn(*mut Handle, *const c_char, *const c_char) -> Status,
    close_session: unsafe extern "C" fn(Handle) -> Status,
    rpc_set_default_interface:
        unsafe extern "C" fn(Handle, *const c_char, *mut *mut c_char) -> Status,
    rpc_invoke: unsafe extern "C" fn(Handle, *const c_char, *mut *mut c_char) -> Status,
    free: unsafe extern "C" fn(*mut c_void) -> Status,
    shutdown: unsafe extern "C" fn() -> Status,
    // Must outlive the function pointers above.
    _library: Library,
}

/// Resolves one exported function from the library.
unsafe fn symbol<T: Copy>(library: &Library, name: &str) -> Result<T> {
    let sym: Symbol<T> = library
        .get(name.as_bytes())
        .map_err(|e| AppError::Config(format!("missing symbol {name} in Nabto library: {e}")))?;
    Ok(*sym)
}

impl Api {
    fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(LIBRARY_FILE);
        let library = unsafe { Library::new(&path) }.map_err(|e| {
            AppError::Config(format!("failed to load {}: {e}", path.display()))
        })?;
        Ok(Self {
            startup: unsafe { symbol(&library, "nabtoStartup")? },
            install_default_static_resources: unsafe {
                symbol(&library, "nabtoInstallDefaultStaticResources")?
            },
            set_option: unsafe { symbol(&library, "nabtoSetOption")? },
            create_profile: unsafe { symbol(&library, "nabtoCreateProfile")? },
            open_session: unsafe { symbol(&library, "nabtoOpenSession")? },
            close_session: unsafe { symbol(&library, "nabtoCloseSession")? },
            rpc_set_default_interface: unsafe {
                symbol(&library, "nabtoRpcSetDefaultInterface")?
            },
            rpc_invoke: unsafe { symbol(&library, "nabtoRpcInvoke")? },
            free: unsafe { symbol(&library, "nabtoFree")? },
            shutdown: unsafe { symbol(&library, "nabtoShutdown")? },
            _library: library,
        })
    }

    /// Copies a library-owned string and releases it.
    fn take_string(&self, p: *mut c_char) -> Option<String> {
        if p.is_null() {
            return None;
        }
        let s = unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned();
        unsafe { (self.free)(p.cast()) };
        Some(s)
    }
}

impl Drop for Api {
    fn drop(&mut self) {
        unsafe { (self.shutdown)() };
    }
}

fn cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| AppError::Config(format!("unexpected NUL byte in {s:?}")))
}

pub struct NabtoConnector {
    api: Arc<Api>,
    host: String,
    user: CString,
    password: CString,
    interface: CString,
}

impl NabtoConnector {
    /// Loads the client library, starts it up and reads the RPC interface
    /// definition. Failures here are configuration errors.
    pub fn new(cfg: &DeviceConfig) -> Result<Self> {
        let api = Api::load(Path::new(&cfg.library_dir))?;

        let home = cstring(&cfg.home_dir)?;
        let status = unsafe { (api.startup)(home.as_ptr()) };
        if status != STATUS_OK {
            return Err(AppError::Config(format!("nabtoStartup failed ({status})")));
        }
        unsafe { (api.install_default_static_resources)(ptr::null()) };
        let option = cstring("urlPortalHostName")?;
        let portal = cstring("lscontrol")?;
        unsafe { (api.set_option)(option.as_ptr(), portal.as_ptr()) };

        let interface = std::fs::read_to_string(&cfg.interface_file)?;
        info!(host = %cfg.host(), "Nabto client started");

        Ok(Self {
            api: Arc::new(api),
            host: cfg.host(),
            user: cstring(&cfg.user)?,
            password: cstring(&cfg.password)?,
            interface: cstring(&interface)?,
        })
    }

    fn open_blocking(&self) -> Result<NabtoSession> {
        let api = &self.api;
        let mut handle: Handle = ptr::null_mut();
        let mut status =
            unsafe { (api.open_session)(&mut handle, self.user.as_ptr(), self.password.as_ptr()) };
        if status == STATUS_NO_PROFILE {
            debug!("no Nabto profile for user; creating one");
            let created =
                unsafe { (api.create_profile)(self.user.as_ptr(), self.password.as_ptr()) };
            if created != STATUS_OK {
                warn!(status = created, "nabtoCreateProfile failed");
            }
            handle = ptr::null_mut();
            status = unsafe {
                (api.open_session)(&mut handle, self.user.as_ptr(), self.password.as_ptr())
            };
        }
        if status != STATUS_OK {
            return Err(AppError::Auth(format!("nabtoOpenSession failed ({status})")));
        }

        let session = NabtoSession {
            api: Arc::clone(api),
            handle,
            host: self.host.clone(),
        };

        let mut err: *mut c_char = ptr::null_mut();
        let status =
            unsafe { (api.rpc_set_default_interface)(handle, self.interface.as_ptr(), &mut err) };
        let message = api.take_string(err);
        if status != STATUS_OK {
            return Err(AppError::Transport(format!(
                "nabtoRpcSetDefaultInterface failed ({status}): {}",
                message.unwrap_or_default()
            )));
        }
        Ok(session)
    }
}

#[async_trait]
impl Connector for NabtoConnector {
    type Session = NabtoSession;

    async fn open_session(&self) -> Result<NabtoSession> {
        tokio::task::block_in_place(|| self.open_blocking())
    }
}

pub struct NabtoSession {
    api: Arc<Api>,
    handle: Handle,
    host: String,
}

// The handle is an opaque token owned by this value; the library accepts
// calls on it from any thread as long as they do not overlap, which the
// `&mut self` receivers guarantee.
unsafe impl Send for NabtoSession {}

impl NabtoSession {
    fn invoke_blocking(&mut self, command: &str, params: &str) -> Result<Value> {
        let url = cstring(&format!("nabto://{}/{}.json?{}", self.host, command, params))?;
        let mut out: *mut c_char = ptr::null_mut();
        let status = unsafe { (self.api.rpc_invoke)(self.handle, url.as_ptr(), &mut out) };
        let body = self.api.take_string(out);
        if status != STATUS_OK {
            return Err(AppError::Transport(format!(
                "{command} failed ({status}): {}",
                body.unwrap_or_default()
            )));
        }
        match body {
            Some(text) => Ok(serde_json::from_str(&text)?),
            None => Ok(Value::Null),
        }
    }
}

#[async_trait]
impl Session for NabtoSession {
    async fn invoke(&mut self, command: &str, params: &str) -> Result<Value> {
        tokio::task::block_in_place(|| self.invoke_blocking(command, params))
    }
}

impl Drop for NabtoSession {
    fn drop(&mut self) {
        unsafe { (self.api.close_session)(self.handle) };
    }
}
