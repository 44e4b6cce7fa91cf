// src/output/shared_slot.rs
//
// One 8-byte native-endian f64 in a named POSIX shared-memory object,
// guarded by a named binary semaphore. Readers open both names, wait on the
// semaphore, read the slot and post. The creator unlinks both on drop.

#[cfg(unix)]
use super::quantize_speed;
use super::SpeedSink;
use anyhow::Result;

#[cfg(unix)]
pub use unix::SharedSpeedSlot;

#[cfg(not(unix))]
pub use fallback::SharedSpeedSlot;

/// Object names as passed to shm_open/sem_open: exactly one leading slash
pub fn posix_name(name: &str) -> String {
    format!("/{}", name.trim_start_matches('/'))
}

#[cfg(unix)]
mod unix {
    use super::*;
    use anyhow::{bail, Context};
    use std::ffi::CString;
    use std::io;
    use tracing::{debug, info, warn};

    const SLOT_BYTES: usize = std::mem::size_of::<f64>();

    pub struct SharedSpeedSlot {
        shm_name: CString,
        sem_name: CString,
        fd: libc::c_int,
        slot: *mut f64,
        sem: *mut libc::sem_t,
    }

    // The mapping and semaphore handles are process-wide; access goes through
    // &mut self and the named semaphore.
    unsafe impl Send for SharedSpeedSlot {}

    impl SharedSpeedSlot {
        pub fn create(shm_name: &str, sem_name: &str) -> Result<Self> {
            let shm_c = CString::new(posix_name(shm_name)).context("shm name contains NUL")?;
            let sem_c = CString::new(posix_name(sem_name)).context("sem name contains NUL")?;

            // SAFETY: all pointers passed are valid NUL-terminated strings or
            // values returned by the preceding call, checked before use.
            unsafe {
                let fd = libc::shm_open(
                    shm_c.as_ptr(),
                    libc::O_CREAT | libc::O_RDWR,
                    0o666 as libc::c_uint,
                );
                if fd < 0 {
                    return Err(io::Error::last_os_error())
                        .with_context(|| format!("shm_open {} failed", shm_name));
                }

                if libc::ftruncate(fd, SLOT_BYTES as libc::off_t) != 0 {
                    let err = io::Error::last_os_error();
                    libc::close(fd);
                    libc::shm_unlink(shm_c.as_ptr());
                    return Err(err).with_context(|| format!("ftruncate {} failed", shm_name));
                }

                let addr = libc::mmap(
                    std::ptr::null_mut(),
                    SLOT_BYTES,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    0,
                );
                if addr == libc::MAP_FAILED {
                    let err = io::Error::last_os_error();
                    libc::close(fd);
                    libc::shm_unlink(shm_c.as_ptr());
                    return Err(err).with_context(|| format!("mmap {} failed", shm_name));
                }

                // A semaphore left by a killed run keeps its old count
                libc::sem_unlink(sem_c.as_ptr());
                let sem = libc::sem_open(
                    sem_c.as_ptr(),
                    libc::O_CREAT | libc::O_EXCL,
                    0o666 as libc::c_uint,
                    1 as libc::c_uint,
                );
                if sem == libc::SEM_FAILED {
                    let err = io::Error::last_os_error();
                    libc::munmap(addr, SLOT_BYTES);
                    libc::close(fd);
                    libc::shm_unlink(shm_c.as_ptr());
                    bail!("sem_open {} failed: {}", sem_name, err);
                }

                let slot = addr as *mut f64;
                std::ptr::write_volatile(slot, 0.0);

                info!(
                    "Shared speed slot {} ({} bytes) guarded by {}",
                    shm_c.to_string_lossy(),
                    SLOT_BYTES,
                    sem_c.to_string_lossy()
                );

                Ok(Self {
                    shm_name: shm_c,
                    sem_name: sem_c,
                    fd,
                    slot,
                    sem,
                })
            }
        }

        fn wait(&self) -> Result<()> {
            loop {
                // SAFETY: self.sem is a live handle from sem_open
                let rc = unsafe { libc::sem_wait(self.sem) };
                if rc == 0 {
                    return Ok(());
                }
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err).context("sem_wait failed");
                }
            }
        }

        pub fn read(&mut self) -> Result<f64> {
            self.wait()?;
            // SAFETY: slot points at SLOT_BYTES of mapped memory
            let value = unsafe { std::ptr::read_volatile(self.slot) };
            unsafe { libc::sem_post(self.sem) };
            Ok(value)
        }
    }

    impl SpeedSink for SharedSpeedSlot {
        fn publish(&mut self, speed_kmh: f64) -> Result<()> {
            self.wait()?;
            // SAFETY: slot points at SLOT_BYTES of mapped memory, and the
            // semaphore is held
            unsafe {
                std::ptr::write_volatile(self.slot, quantize_speed(speed_kmh));
                libc::sem_post(self.sem);
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "shared_memory"
        }
    }

    impl Drop for SharedSpeedSlot {
        fn drop(&mut self) {
            // SAFETY: handles were created in `create` and are released once
            unsafe {
                libc::munmap(self.slot as *mut libc::c_void, SLOT_BYTES);
                libc::close(self.fd);
                if libc::shm_unlink(self.shm_name.as_ptr()) != 0 {
                    warn!("shm_unlink {} failed", self.shm_name.to_string_lossy());
                }
                libc::sem_close(self.sem);
                if libc::sem_unlink(self.sem_name.as_ptr()) != 0 {
                    warn!("sem_unlink {} failed", self.sem_name.to_string_lossy());
                }
            }
            debug!("Shared speed slot released");
        }
    }
}

#[cfg(not(unix))]
mod fallback {
    use super::{Result, SpeedSink};
    use anyhow::bail;

    pub struct SharedSpeedSlot;

    impl SharedSpeedSlot {
        pub fn create(_shm_name: &str, _sem_name: &str) -> Result<Self> {
            bail!("shared_memory transport needs POSIX shared memory")
        }
    }

    impl SpeedSink for SharedSpeedSlot {
        fn publish(&mut self, _speed_kmh: f64) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "shared_memory"
        }
    }
}
