/// Dropping root privileges before serving.
use crate::error::{KitError, Result};

#[cfg(unix)]
mod imp {
    use super::*;
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::ptr;

    const LOOKUP_BUFFER: usize = 16 * 1024;

    fn c_name(name: &str) -> Result<CString> {
        CString::new(name).map_err(|_| KitError::PrivilegeError(format!("Invalid name: {:?}", name)))
    }

    /// uid and primary gid of `user`, or `None` if there is no such user.
    pub fn lookup_user(user: &str) -> Result<Option<(libc::uid_t, libc::gid_t)>> {
        let name = c_name(user)?;
        let mut passwd = MaybeUninit::<libc::passwd>::uninit();
        let mut buffer = vec![0 as libc::c_char; LOOKUP_BUFFER];
        let mut result: *mut libc::passwd = ptr::null_mut();

        let rc = unsafe {
            libc::getpwnam_r(
                name.as_ptr(),
                passwd.as_mut_ptr(),
                buffer.as_mut_ptr(),
                buffer.len(),
                &mut result,
            )
        };
        if rc != 0 {
            return Err(KitError::PrivilegeError(format!(
                "User lookup for {} failed: {}",
                user,
                std::io::Error::from_raw_os_error(rc)
            )));
        }
        if result.is_null() {
            return Ok(None);
        }
        let passwd = unsafe { passwd.assume_init() };
        Ok(Some((passwd.pw_uid, passwd.pw_gid)))
    }

    /// gid of `group`, or `None` if there is no such group.
    pub fn lookup_group(group: &str) -> Result<Option<libc::gid_t>> {
        let name = c_name(group)?;
        let mut entry = MaybeUninit::<libc::group>::uninit();
        let mut buffer = vec![0 as libc::c_char; LOOKUP_BUFFER];
        let mut result: *mut libc::group = ptr::null_mut();

        let rc = unsafe {
            libc::getgrnam_r(
                name.as_ptr(),
                entry.as_mut_ptr(),
                buffer.as_mut_ptr(),
                buffer.len(),
                &mut result,
            )
        };
        if rc != 0 || result.is_null() {
            return Ok(None);
        }
        let entry = unsafe { entry.assume_init() };
        Ok(Some(entry.gr_gid))
    }

    pub fn effective_uid() -> u32 {
        unsafe { libc::geteuid() }
    }

    pub fn set_ids(uid: libc::uid_t, gid: libc::gid_t, user: &str) -> Result<()> {
        let name = c_name(user)?;
        let failed = |what: &str| {
            KitError::PrivilegeError(format!("{} failed: {}", what, std::io::Error::last_os_error()))
        };
        // Supplementary groups first, while still root.
        if unsafe { libc::initgroups(name.as_ptr(), gid as _) } != 0 {
            return Err(failed("initgroups"));
        }
        if unsafe { libc::setgid(gid) } != 0 {
            return Err(failed("setgid"));
        }
        if unsafe { libc::setuid(uid) } != 0 {
            return Err(failed("setuid"));
        }
        Ok(())
    }
}

/// Resolve `user` (and optionally `group`) to numeric ids.
///
/// A missing or unknown group falls back to the user's primary group.
#[cfg(unix)]
pub fn get_uid_gid(user: &str, group: Option<&str>) -> Result<(u32, u32)> {
    let (uid, primary_gid) = imp::lookup_user(user)?
        .ok_or_else(|| KitError::PrivilegeError(format!("Unknown user: {}", user)))?;

    let gid = match group {
        Some(group) => imp::lookup_group(group)?.unwrap_or_else(|| {
            log::warn!("Unknown group {}, using primary group of {}", group, user);
            primary_gid
        }),
        None => primary_gid,
    };
    Ok((uid, gid))
}

/// Switch to `user`/`group` when running as root.
///
/// Returns whether the process identity changed. Not running as root is a
/// silent no-op.
#[cfg(unix)]
pub fn change_uid_gid(user: &str, group: Option<&str>) -> Result<bool> {
    if imp::effective_uid() != 0 {
        return Ok(false);
    }
    let (uid, gid) = get_uid_gid(user, group)?;
    imp::set_ids(uid, gid, user)?;
    log::info!("Running as {} (uid {}, gid {})", user, uid, gid);
    Ok(true)
}

#[cfg(not(unix))]
pub fn change_uid_gid(user: &str, _group: Option<&str>) -> Result<bool> {
    log::debug!("Privilege drop to {} is not supported on this platform", user);
    Ok(false)
}
