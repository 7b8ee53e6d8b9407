//! Concrete binding to the vendor resolver library via `dlopen`
//! (`libloading`), since the engine itself is an opaque, closed-source
//! C-ABI shared object (spec 1: "Out of scope... the resolver itself
//! (an opaque library)"). The symbol table below is the narrow C
//! surface the facade trait maps onto.

use std::ffi::{c_char, c_int, CString};
use std::sync::Mutex;

use libloading::{Library, Symbol};

use crate::errors::ResolverError;
use crate::resolver::{ResolverEngine, ResolverResult};

type InitFn = unsafe extern "C" fn(*const c_char, *const c_char, c_int) -> c_int;
type SimpleRecordFn = unsafe extern "C" fn(*const c_char, *const c_char, *const c_char) -> c_int;
type RecordWithInfoFn =
    unsafe extern "C" fn(*const c_char, *const c_char, *const c_char, *mut *mut c_char, *mut usize) -> c_int;
type KeyOnlyFn = unsafe extern "C" fn(*const c_char, *const c_char) -> c_int;
type KeyOnlyWithInfoFn = unsafe extern "C" fn(*const c_char, *const c_char, *mut *mut c_char, *mut usize) -> c_int;
type GetStringFn = unsafe extern "C" fn(*mut *mut c_char, *mut usize) -> c_int;
type ReinitFn = unsafe extern "C" fn(*const c_char) -> c_int;
type VoidFn = unsafe extern "C" fn() -> c_int;
type FreeBufferFn = unsafe extern "C" fn(*mut c_char);

/// An engine handle bound to one loaded shared object. The `Mutex`
/// guards only `destroy` / lifecycle transitions -- record operations
/// are documented by the vendor as internally thread-safe (spec 4.5:
/// "the resolver is internally thread-safe for record operations"),
/// so concurrent workers call through the same handle unguarded.
pub struct FfiResolver {
    library: Library,
    destroyed: Mutex<bool>,
}

impl FfiResolver {
    /// # Safety
    /// The caller must point `library_path` at a resolver shared
    /// object matching the ABI this module assumes.
    pub unsafe fn load(library_path: &str) -> ResolverResult<Self> {
        let library = Library::new(library_path)
            .map_err(|e| ResolverError::Other(format!("failed to load resolver library {library_path}: {e}")))?;
        Ok(FfiResolver {
            library,
            destroyed: Mutex::new(false),
        })
    }

    unsafe fn symbol<T>(&self, name: &str) -> ResolverResult<Symbol<'_, T>> {
        self.library
            .get(name.as_bytes())
            .map_err(|e| ResolverError::Other(format!("resolver symbol {name} missing: {e}")))
    }

    fn classify(code: c_int, context: &str) -> ResolverError {
        if code == -2 {
            ResolverError::NotInitialized
        } else if code == -1 {
            ResolverError::Generic(format!("{context} returned generic error"))
        } else {
            ResolverError::Other(format!("{context} returned code {code}"))
        }
    }

    fn cstring(s: &str) -> ResolverResult<CString> {
        CString::new(s).map_err(|e| ResolverError::Other(format!("record contains NUL byte: {e}")))
    }

    unsafe fn take_info_buffer(&self, buf: *mut c_char, len: usize) -> ResolverResult<String> {
        if buf.is_null() {
            return Ok(String::new());
        }
        let slice = std::slice::from_raw_parts(buf as *const u8, len);
        let owned = String::from_utf8_lossy(slice).trim_end_matches('\0').to_string();
        if let Ok(free_fn) = self.symbol::<FreeBufferFn>("G2_free") {
            free_fn(buf);
        }
        Ok(owned)
    }
}

impl ResolverEngine for FfiResolver {
    fn init(&self, module_name: &str, config_json: &str, debug: bool) -> ResolverResult<()> {
        unsafe {
            let init_fn: Symbol<InitFn> = self.symbol("G2_init")?;
            let module_name = Self::cstring(module_name)?;
            let config_json = Self::cstring(config_json)?;
            let rc = init_fn(module_name.as_ptr(), config_json.as_ptr(), debug as c_int);
            if rc != 0 {
                return Err(Self::classify(rc, "G2_init"));
            }
            Ok(())
        }
    }

    fn add_record(&self, data_source: &str, record_id: &str, record_json: &str) -> ResolverResult<()> {
        unsafe {
            let add_fn: Symbol<SimpleRecordFn> = self.symbol("G2_addRecord")?;
            let data_source = Self::cstring(data_source)?;
            let record_id = Self::cstring(record_id)?;
            let record_json = Self::cstring(record_json)?;
            let rc = add_fn(data_source.as_ptr(), record_id.as_ptr(), record_json.as_ptr());
            if rc != 0 {
                return Err(Self::classify(rc, "G2_addRecord"));
            }
            Ok(())
        }
    }

    fn add_record_with_info(&self, data_source: &str, record_id: &str, record_json: &str) -> ResolverResult<String> {
        unsafe {
            let add_fn: Symbol<RecordWithInfoFn> = self.symbol("G2_addRecordWithInfo")?;
            let data_source = Self::cstring(data_source)?;
            let record_id = Self::cstring(record_id)?;
            let record_json = Self::cstring(record_json)?;
            let mut buf: *mut c_char = std::ptr::null_mut();
            let mut len: usize = 0;
            let rc = add_fn(
                data_source.as_ptr(),
                record_id.as_ptr(),
                record_json.as_ptr(),
                &mut buf,
                &mut len,
            );
            if rc != 0 {
                return Err(Self::classify(rc, "G2_addRecordWithInfo"));
            }
            self.take_info_buffer(buf, len)
        }
    }

    fn delete_record(&self, data_source: &str, record_id: &str) -> ResolverResult<()> {
        unsafe {
            let delete_fn: Symbol<KeyOnlyFn> = self.symbol("G2_deleteRecord")?;
            let data_source = Self::cstring(data_source)?;
            let record_id = Self::cstring(record_id)?;
            let rc = delete_fn(data_source.as_ptr(), record_id.as_ptr());
            if rc != 0 {
                return Err(Self::classify(rc, "G2_deleteRecord"));
            }
            Ok(())
        }
    }

    fn delete_record_with_info(&self, data_source: &str, record_id: &str) -> ResolverResult<String> {
        unsafe {
            let delete_fn: Symbol<KeyOnlyWithInfoFn> = self.symbol("G2_deleteRecordWithInfo")?;
            let data_source = Self::cstring(data_source)?;
            let record_id = Self::cstring(record_id)?;
            let mut buf: *mut c_char = std::ptr::null_mut();
            let mut len: usize = 0;
            let rc = delete_fn(data_source.as_ptr(), record_id.as_ptr(), &mut buf, &mut len);
            if rc != 0 {
                return Err(Self::classify(rc, "G2_deleteRecordWithInfo"));
            }
            self.take_info_buffer(buf, len)
        }
    }

    fn reevaluate_record(&self, data_source: &str, record_id: &str) -> ResolverResult<()> {
        unsafe {
            let reeval_fn: Symbol<KeyOnlyFn> = self.symbol("G2_reevaluateRecord")?;
            let data_source = Self::cstring(data_source)?;
            let record_id = Self::cstring(record_id)?;
            let rc = reeval_fn(data_source.as_ptr(), record_id.as_ptr());
            if rc != 0 {
                return Err(Self::classify(rc, "G2_reevaluateRecord"));
            }
            Ok(())
        }
    }

    fn reevaluate_record_with_info(&self, data_source: &str, record_id: &str) -> ResolverResult<String> {
        unsafe {
            let reeval_fn: Symbol<KeyOnlyWithInfoFn> = self.symbol("G2_reevaluateRecordWithInfo")?;
            let data_source = Self::cstring(data_source)?;
            let record_id = Self::cstring(record_id)?;
            let mut buf: *mut c_char = std::ptr::null_mut();
            let mut len: usize = 0;
            let rc = reeval_fn(data_source.as_ptr(), record_id.as_ptr(), &mut buf, &mut len);
            if rc != 0 {
                return Err(Self::classify(rc, "G2_reevaluateRecordWithInfo"));
            }
            self.take_info_buffer(buf, len)
        }
    }

    fn get_active_config_id(&self) -> ResolverResult<String> {
        unsafe {
            let get_fn: Symbol<GetStringFn> = self.symbol("G2_getActiveConfigID")?;
            let mut buf: *mut c_char = std::ptr::null_mut();
            let mut len: usize = 0;
            let rc = get_fn(&mut buf, &mut len);
            if rc != 0 {
                return Err(Self::classify(rc, "G2_getActiveConfigID"));
            }
            self.take_info_buffer(buf, len)
        }
    }

    fn get_default_config_id(&self) -> ResolverResult<String> {
        unsafe {
            let get_fn: Symbol<GetStringFn> = self.symbol("G2Config_getDefaultConfigID")?;
            let mut buf: *mut c_char = std::ptr::null_mut();
            let mut len: usize = 0;
            let rc = get_fn(&mut buf, &mut len);
            if rc != 0 {
                return Err(Self::classify(rc, "G2Config_getDefaultConfigID"));
            }
            self.take_info_buffer(buf, len)
        }
    }

    fn reinit(&self, config_id: &str) -> ResolverResult<()> {
        unsafe {
            let reinit_fn: Symbol<ReinitFn> = self.symbol("G2_reinit")?;
            let config_id = Self::cstring(config_id)?;
            let rc = reinit_fn(config_id.as_ptr());
            if rc != 0 {
                return Err(Self::classify(rc, "G2_reinit"));
            }
            Ok(())
        }
    }

    fn stats(&self) -> ResolverResult<String> {
        unsafe {
            let stats_fn: Symbol<GetStringFn> = self.symbol("G2_stats")?;
            let mut buf: *mut c_char = std::ptr::null_mut();
            let mut len: usize = 0;
            let rc = stats_fn(&mut buf, &mut len);
            if rc != 0 {
                return Err(Self::classify(rc, "G2_stats"));
            }
            self.take_info_buffer(buf, len)
        }
    }

    fn license(&self) -> ResolverResult<String> {
        unsafe {
            let license_fn: Symbol<GetStringFn> = self.symbol("G2_license")?;
            let mut buf: *mut c_char = std::ptr::null_mut();
            let mut len: usize = 0;
            let rc = license_fn(&mut buf, &mut len);
            if rc != 0 {
                return Err(Self::classify(rc, "G2_license"));
            }
            self.take_info_buffer(buf, len)
        }
    }

    fn version(&self) -> ResolverResult<String> {
        unsafe {
            let version_fn: Symbol<GetStringFn> = self.symbol("G2_version")?;
            let mut buf: *mut c_char = std::ptr::null_mut();
            let mut len: usize = 0;
            let rc = version_fn(&mut buf, &mut len);
            if rc != 0 {
                return Err(Self::classify(rc, "G2_version"));
            }
            self.take_info_buffer(buf, len)
        }
    }

    fn prime_engine(&self) -> ResolverResult<()> {
        unsafe {
            let prime_fn: Symbol<VoidFn> = self.symbol("G2_primeEngine")?;
            let rc = prime_fn();
            if rc != 0 {
                return Err(Self::classify(rc, "G2_primeEngine"));
            }
            Ok(())
        }
    }

    fn destroy(&self) -> ResolverResult<()> {
        let mut destroyed = self.destroyed.lock().expect("destroyed lock poisoned");
        if *destroyed {
            return Ok(());
        }
        unsafe {
            let destroy_fn: Symbol<VoidFn> = self.symbol("G2_destroy")?;
            let rc = destroy_fn();
            if rc != 0 {
                return Err(Self::classify(rc, "G2_destroy"));
            }
        }
        *destroyed = true;
        Ok(())
    }
}
