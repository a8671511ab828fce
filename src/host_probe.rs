//! Advisory check for whether the current host's dynamic loader can resolve
//! a dylib path right now. Drives `--auto-remove-dylibs`.

/// Attempts a lazy, local `dlopen` of `path` and immediately releases the
/// handle on success. Never panics and never propagates a loader error —
/// any failure to resolve collapses to `false`.
///
/// A `false` result authorizes automatic removal; a `true` result does not
/// forbid a caller from removing the dependency explicitly via `-r`.
#[cfg(unix)]
pub fn exists(path: &str) -> bool {
    use std::ffi::CString;

    let Ok(c_path) = CString::new(path) else {
        return false;
    };

    // SAFETY: `c_path` is a valid NUL-terminated string for the duration of
    // the call. The handle, if any, is closed before returning, so no
    // library stays mapped as a side effect of probing it.
    unsafe {
        let handle = libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL);
        if handle.is_null() {
            false
        } else {
            libc::dlclose(handle);
            true
        }
    }
}

/// On non-Unix hosts there is no dynamic loader to ask; conservatively
/// report that the dependency cannot be resolved, which authorizes
/// auto-removal rather than silently skipping it.
#[cfg(not(unix))]
pub fn exists(_path: &str) -> bool {
    false
}
