// PWM output channels
//
// A motor driver pin is modelled as one PWM channel with a frequency and a
// duty cycle expressed in nanoseconds. Two backends:
// - SimPwm: in-memory, used for simulation and tests
// - SysfsPwm: Linux /sys/class/pwm interface

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Default sysfs root for PWM chips
pub const SYSFS_PWM_ROOT: &str = "/sys/class/pwm";

/// Error types for PWM output
#[derive(Debug, thiserror::Error)]
pub enum PwmError {
    #[error("PWM IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Duty cycle {duty_ns}ns exceeds period {period_ns}ns")]
    DutyOutOfRange { duty_ns: u32, period_ns: u32 },

    #[error("Invalid PWM frequency: {0}Hz")]
    InvalidFrequency(u32),
}

pub type Result<T> = std::result::Result<T, PwmError>;

/// Convert a frequency to its period in nanoseconds
pub fn period_ns(freq_hz: u32) -> Result<u32> {
    if freq_hz == 0 {
        return Err(PwmError::InvalidFrequency(freq_hz));
    }
    Ok(1_000_000_000 / freq_hz)
}

/// A single PWM output
///
/// Writing the duty value that is already in effect must not touch the
/// hardware.
pub trait PwmChannel: Send {
    /// Set the output frequency (also resets duty to zero)
    fn set_frequency(&mut self, freq_hz: u32) -> Result<()>;

    /// Set the active time per period in nanoseconds
    fn set_duty_ns(&mut self, duty_ns: u32) -> Result<()>;

    /// Duty cycle currently output, in nanoseconds
    fn duty_ns(&self) -> u32;
}

#[derive(Debug, Default)]
struct SimState {
    period_ns: u32,
    duty_ns: u32,
    writes: u64,
}

/// In-memory PWM channel
///
/// Clones share the same output, so a test can keep one handle and give
/// the other to a driver.
#[derive(Debug, Clone, Default)]
pub struct SimPwm {
    state: Arc<Mutex<SimState>>,
}

impl SimPwm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hardware-level duty changes issued so far
    pub fn writes(&self) -> u64 {
        self.lock().writes
    }

    /// Configured period in nanoseconds (0 until a frequency is set)
    pub fn period_ns(&self) -> u32 {
        self.lock().period_ns
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PwmChannel for SimPwm {
    fn set_frequency(&mut self, freq_hz: u32) -> Result<()> {
        let period = period_ns(freq_hz)?;
        let mut state = self.lock();
        state.period_ns = period;
        if state.duty_ns != 0 {
            state.duty_ns = 0;
            state.writes += 1;
        }
        Ok(())
    }

    fn set_duty_ns(&mut self, duty_ns: u32) -> Result<()> {
        let mut state = self.lock();
        if state.period_ns != 0 && duty_ns > state.period_ns {
            return Err(PwmError::DutyOutOfRange {
                duty_ns,
                period_ns: state.period_ns,
            });
        }
        if state.duty_ns != duty_ns {
            state.duty_ns = duty_ns;
            state.writes += 1;
        }
        Ok(())
    }

    fn duty_ns(&self) -> u32 {
        self.lock().duty_ns
    }
}

/// PWM channel driven through the Linux sysfs interface
///
/// Layout: `<root>/pwmchipN/{export, pwmM/{period, duty_cycle, enable}}`
pub struct SysfsPwm {
    dir: PathBuf,
    period_ns: u32,
    duty_ns: u32,
}

impl SysfsPwm {
    /// Open channel `channel` of `pwmchip{chip}` under the default root
    pub fn open(chip: u32, channel: u32) -> Result<Self> {
        Self::open_at(Path::new(SYSFS_PWM_ROOT), chip, channel)
    }

    /// Open a channel under a custom sysfs root, exporting it if needed
    pub fn open_at(root: &Path, chip: u32, channel: u32) -> Result<Self> {
        let chip_dir = root.join(format!("pwmchip{}", chip));
        let dir = chip_dir.join(format!("pwm{}", channel));

        if !dir.exists() {
            debug!("Exporting PWM channel {} on {}", channel, chip_dir.display());
            write_attr(&chip_dir.join("export"), channel)?;
        }

        // Start from a known state: nothing output
        write_attr(&dir.join("duty_cycle"), 0)?;
        Ok(Self {
            dir,
            period_ns: 0,
            duty_ns: 0,
        })
    }

    /// Sysfs directory of this channel
    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl PwmChannel for SysfsPwm {
    fn set_frequency(&mut self, freq_hz: u32) -> Result<()> {
        let period = period_ns(freq_hz)?;
        // duty_cycle may never exceed period, so clear it first
        write_attr(&self.dir.join("duty_cycle"), 0)?;
        self.duty_ns = 0;
        write_attr(&self.dir.join("period"), period)?;
        write_attr(&self.dir.join("enable"), 1)?;
        self.period_ns = period;
        Ok(())
    }

    fn set_duty_ns(&mut self, duty_ns: u32) -> Result<()> {
        if self.period_ns != 0 && duty_ns > self.period_ns {
            return Err(PwmError::DutyOutOfRange {
                duty_ns,
                period_ns: self.period_ns,
            });
        }
        if duty_ns == self.duty_ns {
            return Ok(());
        }
        write_attr(&self.dir.join("duty_cycle"), duty_ns)?;
        self.duty_ns = duty_ns;
        Ok(())
    }

    fn duty_ns(&self) -> u32 {
        self.duty_ns
    }
}

impl Drop for SysfsPwm {
    fn drop(&mut self) {
        // The kernel keeps the last duty running after the process exits
        if let Err(e) = write_attr(&self.dir.join("duty_cycle"), 0) {
            tracing::warn!("Failed to zero PWM {} on drop: {}", self.dir.display(), e);
        }
    }
}

fn write_attr(path: &Path, value: u32) -> Result<()> {
    fs::write(path, value.to_string()).map_err(|source| PwmError::Io {
        path: path.to_path_buf(),
        source,
    })
}
