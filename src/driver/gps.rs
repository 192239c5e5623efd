/* GPS driver: NMEA 0183 over a serial device.
 *
 * The receiver streams sentences at its own rate (typically 1 Hz); this
 * driver cuts the byte stream into lines, validates each sentence's
 * checksum, and turns GGA sentences into fix records. Other sentence
 * types are consumed and skipped. */

use std::fs::File;
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::libc;
use tracing::debug;

use crate::driver::{DataDesc, DataDriver, RecordSink, SchedMode};
use crate::error::Result;
use crate::record::{DataId, DataRequest, Period};
use crate::schema::{FieldFmt, FmtType, Unit};

const GPS_PERIODS: [Period; 2] = [100_000_000, 1_000_000_000];

/* Payload layout of a fix record: lat, lon (double, degrees), altitude
 * (float, meters), satellites (uint8). */
const FIX_SIZE: usize = 21;

pub struct GpsDriver {
    path: PathBuf,
    descs: Vec<DataDesc>,
}

impl GpsDriver {
    pub fn new(path: &Path) -> Self {
        let fmt = vec![
            FieldFmt {
                name: "latitude".to_string(),
                unit: Unit::Degree,
                ty: FmtType::Double,
                offset: 0,
                size: 8,
            },
            FieldFmt {
                name: "longitude".to_string(),
                unit: Unit::Degree,
                ty: FmtType::Double,
                offset: 8,
                size: 8,
            },
            FieldFmt {
                name: "altitude".to_string(),
                unit: Unit::Meter,
                ty: FmtType::Float,
                offset: 16,
                size: 4,
            },
            FieldFmt {
                name: "satellites".to_string(),
                unit: Unit::None,
                ty: FmtType::Uint8,
                offset: 20,
                size: 1,
            },
        ];
        let descs = vec![DataDesc {
            id: DataId::GPS_FIX,
            name: "gps_fix".to_string(),
            sched: SchedMode::Push,
            periods: GPS_PERIODS.to_vec(),
            fmt,
        }];
        Self {
            path: path.to_path_buf(),
            descs,
        }
    }
}

#[async_trait]
impl DataDriver for GpsDriver {
    fn device_name(&self) -> &str {
        "gps"
    }

    fn datadesc(&self) -> &[DataDesc] {
        &self.descs
    }

    async fn setdata(&mut self, _requests: &[DataRequest]) -> Result<()> {
        Ok(())
    }

    async fn parse(&mut self, buf: &[u8], sink: &mut RecordSink) -> Result<usize> {
        let mut consumed = 0;
        while let Some(nl) = buf[consumed..].iter().position(|&b| b == b'\n') {
            let line = &buf[consumed..consumed + nl];
            consumed += nl + 1;

            let Ok(line) = std::str::from_utf8(line) else {
                debug!("skipping non-UTF8 sentence");
                continue;
            };
            if let Some(fix) = decode_gga(line.trim_end_matches('\r')) {
                sink.push(DataId::GPS_FIX, fix.encode().to_vec());
            }
        }
        Ok(consumed)
    }

    async fn start(&mut self, _sink: &mut RecordSink) -> Result<OwnedFd> {
        let tty = File::options()
            .read(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
            .open(&self.path)?;
        Ok(OwnedFd::from(tty))
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

struct GgaFix {
    latitude: f64,
    longitude: f64,
    altitude: f32,
    satellites: u8,
}

impl GgaFix {
    fn encode(&self) -> [u8; FIX_SIZE] {
        let mut out = [0u8; FIX_SIZE];
        out[..8].copy_from_slice(&self.latitude.to_le_bytes());
        out[8..16].copy_from_slice(&self.longitude.to_le_bytes());
        out[16..20].copy_from_slice(&self.altitude.to_le_bytes());
        out[20] = self.satellites;
        out
    }
}

/* Decode a GGA sentence; any sentence that is not a valid GGA fix
 * (wrong type, bad checksum, no satellite lock) yields `None`. */
fn decode_gga(line: &str) -> Option<GgaFix> {
    let body = checked_body(line)?;
    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 10 || !matches!(fields[0], "GPGGA" | "GNGGA") {
        return None;
    }
    /* Fix quality 0 means no lock. */
    if fields[6].is_empty() || fields[6] == "0" {
        return None;
    }

    let latitude = angular(fields[2], 2)? * hemisphere(fields[3], 'S')?;
    let longitude = angular(fields[4], 3)? * hemisphere(fields[5], 'W')?;
    let satellites = fields[7].parse().ok()?;
    let altitude = fields[9].parse().ok()?;

    Some(GgaFix {
        latitude,
        longitude,
        altitude,
        satellites,
    })
}

/* Strip `$...*hh` framing and verify the XOR checksum; returns the body
 * between `$` and `*`. Sentences without a checksum are accepted (the
 * spec marks it optional). */
fn checked_body(line: &str) -> Option<&str> {
    let body = line.strip_prefix('$')?;
    let Some((payload, given)) = body.rsplit_once('*') else {
        return Some(body);
    };
    let want = u8::from_str_radix(given, 16).ok()?;
    let got = payload.bytes().fold(0u8, |acc, b| acc ^ b);
    if got != want {
        debug!("NMEA checksum mismatch: computed {got:02X}, sentence says {want:02X}");
        return None;
    }
    Some(payload)
}

/* Convert NMEA ddmm.mmmm / dddmm.mmmm to decimal degrees. */
fn angular(field: &str, degree_digits: usize) -> Option<f64> {
    if field.len() <= degree_digits {
        return None;
    }
    let degrees: f64 = field[..degree_digits].parse().ok()?;
    let minutes: f64 = field[degree_digits..].parse().ok()?;
    Some(degrees + minutes / 60.0)
}

/* +1.0 for the positive hemisphere, -1.0 for `negative`. */
fn hemisphere(field: &str, negative: char) -> Option<f64> {
    let c = field.chars().next()?;
    if c == negative {
        Some(-1.0)
    } else {
        Some(1.0)
    }
}
