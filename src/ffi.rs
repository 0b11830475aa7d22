//! FFI bindings for Artificien
//!
//! This module provides C-compatible functions for the mobile host. The host
//! reads health data natively, writes metrics into the preference store
//! through these functions, and reads back the dashboard view and the
//! feature vector. All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using
//! `artificien_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::controller::{DashboardView, ScreenState};
use crate::error::ArtificienError;
use crate::features::AppDataPreparer;
use crate::store::{
    FilePreferenceStore, MemoryPreferenceStore, MetricKey, PreferenceStore, PreferenceValue,
};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Convert a Rust string to a C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Map a result to an owned C string, recording errors
fn json_result(result: Result<String, ArtificienError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

unsafe fn metric_key(key: *const c_char) -> Result<MetricKey, ArtificienError> {
    let name = cstr_to_string(key)
        .ok_or_else(|| ArtificienError::StorageError("Invalid key string pointer".to_string()))?;
    MetricKey::from_name(&name)
        .ok_or_else(|| ArtificienError::StorageError(format!("Unknown metric key: {name}")))
}

// ============================================================================
// Preference Store API
// ============================================================================

/// Opaque handle to a preference store
pub struct StoreHandle {
    store: Box<dyn PreferenceStore + Send>,
}

/// Open the preference store at `path`, or an in-memory store if `path` is NULL.
///
/// # Safety
/// - `path` must be NULL or a valid null-terminated C string.
/// - Must be freed with `artificien_store_free`.
/// - Returns NULL on error; call `artificien_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn artificien_store_open(path: *const c_char) -> *mut StoreHandle {
    clear_last_error();

    let store: Box<dyn PreferenceStore + Send> = if path.is_null() {
        Box::new(MemoryPreferenceStore::new())
    } else {
        let path = match cstr_to_string(path) {
            Some(p) => p,
            None => {
                set_last_error("Invalid path string pointer");
                return ptr::null_mut();
            }
        };
        match FilePreferenceStore::open(path) {
            Ok(store) => Box::new(store),
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    Box::into_raw(Box::new(StoreHandle { store }))
}

/// Free a preference store.
///
/// # Safety
/// - `store` must be a valid pointer returned by `artificien_store_open`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn artificien_store_free(store: *mut StoreHandle) {
    if !store.is_null() {
        drop(Box::from_raw(store));
    }
}

/// Read a metric as JSON (`null` when absent).
///
/// # Safety
/// - `store` must be a valid pointer returned by `artificien_store_open`.
/// - `key` must be a valid null-terminated C string naming a metric key.
/// - Returns a newly allocated string that must be freed with `artificien_free_string`.
/// - Returns NULL on error; call `artificien_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn artificien_store_get(
    store: *const StoreHandle,
    key: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if store.is_null() {
        set_last_error("Null store pointer");
        return ptr::null_mut();
    }
    let handle = &*store;

    json_result(metric_key(key).and_then(|key| {
        let value = handle.store.get(key);
        Ok(serde_json::to_string(&value)?)
    }))
}

/// Write a metric from a JSON scalar (bool, number or string). `null` removes it.
///
/// # Safety
/// - `store` must be a valid pointer returned by `artificien_store_open`.
/// - `key` and `value_json` must be valid null-terminated C strings.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `artificien_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn artificien_store_set(
    store: *mut StoreHandle,
    key: *const c_char,
    value_json: *const c_char,
) -> i32 {
    clear_last_error();

    if store.is_null() {
        set_last_error("Null store pointer");
        return -1;
    }
    let handle = &mut *store;

    let key = match metric_key(key) {
        Ok(key) => key,
        Err(e) => {
            set_last_error(&e.to_string());
            return -1;
        }
    };

    let json = match cstr_to_string(value_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid value string pointer");
            return -1;
        }
    };

    let result = serde_json::from_str::<Option<PreferenceValue>>(&json)
        .map_err(ArtificienError::from)
        .and_then(|value| match value {
            Some(value) => handle.store.set(key, value),
            None => handle.store.remove(key),
        });

    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Feature and View API
// ============================================================================

/// Build the feature vector `[age, bmi, sex, steps]` as a JSON array.
///
/// # Safety
/// - `store` must be a valid pointer returned by `artificien_store_open`.
/// - Returns a newly allocated string that must be freed with `artificien_free_string`.
/// - Returns NULL when a required metric is missing; `artificien_last_error` names it.
#[no_mangle]
pub unsafe extern "C" fn artificien_prepare_features(store: *const StoreHandle) -> *mut c_char {
    clear_last_error();

    if store.is_null() {
        set_last_error("Null store pointer");
        return ptr::null_mut();
    }
    let store = &*(*store).store;

    let result = match AppDataPreparer::prepare(store) {
        Some(features) => serde_json::to_string(&features.to_array()).map_err(ArtificienError::from),
        None => {
            let missing: Vec<&str> = AppDataPreparer::missing_fields(store)
                .iter()
                .map(|k| k.as_str())
                .collect();
            Err(ArtificienError::PreprocessingDataMissing(missing.join(", ")))
        }
    };
    json_result(result)
}

/// Render the dashboard view from the store as JSON.
///
/// # Safety
/// - `store` must be a valid pointer returned by `artificien_store_open`.
/// - Returns a newly allocated string that must be freed with `artificien_free_string`.
/// - Returns NULL on error; call `artificien_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn artificien_dashboard_view(store: *const StoreHandle) -> *mut c_char {
    clear_last_error();

    if store.is_null() {
        set_last_error("Null store pointer");
        return ptr::null_mut();
    }
    let store = &*(*store).store;

    let view = DashboardView::from_store(ScreenState::on_load(store), store);
    json_result(serde_json::to_string(&view).map_err(ArtificienError::from))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Artificien functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an Artificien function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn artificien_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - The returned pointer is valid until the next Artificien call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn artificien_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn artificien_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        artificien_free_string(ptr);
        s
    }

    unsafe fn set(store: *mut StoreHandle, key: &str, value: &str) -> i32 {
        let key = CString::new(key).unwrap();
        let value = CString::new(value).unwrap();
        artificien_store_set(store, key.as_ptr(), value.as_ptr())
    }

    #[test]
    fn test_ffi_store_roundtrip_and_features() {
        unsafe {
            let store = artificien_store_open(ptr::null());
            assert!(!store.is_null());

            assert_eq!(set(store, "age", "34"), 0);
            assert_eq!(set(store, "bodyMassIndex", "24.5"), 0);
            assert_eq!(set(store, "biologicalSex", "\"Male\""), 0);

            let key = CString::new("age").unwrap();
            assert_eq!(take_string(artificien_store_get(store, key.as_ptr())), "34");

            // steps missing
            let features = artificien_prepare_features(store);
            assert!(features.is_null());
            let error = CStr::from_ptr(artificien_last_error()).to_str().unwrap();
            assert!(error.contains("stepCount"));

            assert_eq!(set(store, "stepCount", "17.5"), 0);
            let features = take_string(artificien_prepare_features(store));
            assert_eq!(features, "[34.0,24.5,1.0,17.5]");

            // null removes
            assert_eq!(set(store, "stepCount", "null"), 0);
            let key = CString::new("stepCount").unwrap();
            assert_eq!(take_string(artificien_store_get(store, key.as_ptr())), "null");

            artificien_store_free(store);
        }
    }

    #[test]
    fn test_ffi_file_store_and_view() {
        let dir = tempfile::tempdir().unwrap();
        let path = CString::new(dir.path().join("prefs.json").to_str().unwrap()).unwrap();

        unsafe {
            let store = artificien_store_open(path.as_ptr());
            assert!(!store.is_null());
            assert_eq!(set(store, "healthKitAuthorized", "true"), 0);
            assert_eq!(set(store, "weightInKilograms", "81.0"), 0);
            artificien_store_free(store);

            let store = artificien_store_open(path.as_ptr());
            let view: serde_json::Value =
                serde_json::from_str(&take_string(artificien_dashboard_view(store))).unwrap();
            assert_eq!(view["state"], "authorized_stale");
            assert_eq!(view["authorized_status"], "Authorized");
            assert_eq!(view["weight"], "81.0 kg");
            assert!(view["height"].is_null());
            artificien_store_free(store);
        }
    }

    #[test]
    fn test_ffi_set_checks_value_kind() {
        unsafe {
            let store = artificien_store_open(ptr::null());

            assert_eq!(set(store, "healthKitAuthorized", "\"yes\""), -1);
            let error = CStr::from_ptr(artificien_last_error()).to_str().unwrap();
            assert!(error.contains("healthKitAuthorized"));
            let key = CString::new("healthKitAuthorized").unwrap();
            assert_eq!(take_string(artificien_store_get(store, key.as_ptr())), "null");

            // whole-number ages are stored as integers
            assert_eq!(set(store, "age", "34.0"), 0);
            assert_eq!(set(store, "age", "34.5"), -1);
            assert_eq!(set(store, "bodyMassIndex", "24"), 0);
            assert_eq!(set(store, "biologicalSex", "\"Female\""), 0);
            assert_eq!(set(store, "stepCount", "17.5"), 0);

            let features = take_string(artificien_prepare_features(store));
            assert_eq!(features, "[34.0,24.0,0.0,17.5]");

            artificien_store_free(store);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let store = artificien_store_open(ptr::null());

            assert_eq!(set(store, "modelLoss", "0.5"), -1);
            let error = CStr::from_ptr(artificien_last_error()).to_str().unwrap();
            assert!(error.contains("modelLoss"));

            assert_eq!(set(store, "age", "{not json"), -1);
            assert!(!artificien_last_error().is_null());

            assert_eq!(set(store, "age", "34"), 0);
            assert!(artificien_last_error().is_null());

            assert!(artificien_prepare_features(ptr::null()).is_null());
            artificien_store_free(store);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = CStr::from_ptr(artificien_version()).to_str().unwrap();
            assert_eq!(version, env!("CARGO_PKG_VERSION"));
        }
    }
}
