//! CSV export of in-memory sample buffers.
//!
//! One file per device, `<deviceName>_<YYYYMMDD-HHMMSS>.csv`, columns
//! `time_seconds` then one per sensor in sensor-id order. Rows are the
//! sorted union of sample timestamps; a sensor without a sample at a given
//! instant leaves its cell empty.

use crate::device::SampleDump;
use chrono::Local;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write `dump` as CSV into `dir`; returns the created file path.
pub fn write_csv(dump: &SampleDump, dir: &Path) -> std::io::Result<PathBuf> {
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let path = dir.join(format!("{}_{stamp}.csv", dump.device_name));
    let mut file = std::fs::File::create(&path)?;
    write_csv_to(dump, &mut file)?;
    file.flush()?;
    Ok(path)
}

/// Assemble the CSV body.
///
/// Timestamps are compared through their bit pattern so they can key a map;
/// projected sample times are finite by construction.
pub fn write_csv_to(dump: &SampleDump, out: &mut impl Write) -> std::io::Result<()> {
    write!(out, "time_seconds")?;
    for (name, _) in &dump.sensors {
        write!(out, ",{name}")?;
    }
    writeln!(out)?;

    // row key: time bits → per-sensor value
    let mut rows: BTreeMap<u64, Vec<Option<f32>>> = BTreeMap::new();
    let sensor_count = dump.sensors.len();
    for (i, (_, samples)) in dump.sensors.iter().enumerate() {
        for (t, value) in samples {
            let row = rows.entry(t.to_bits()).or_insert_with(|| vec![None; sensor_count]);
            row[i] = Some(*value);
        }
    }

    for (t_bits, row) in rows {
        write!(out, "{:.3}", f64::from_bits(t_bits))?;
        for value in row {
            match value {
                Some(v) => write!(out, ",{v}")?,
                None => write!(out, ",")?,
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump() -> SampleDump {
        SampleDump {
            device_name: "EngineStand".to_owned(),
            sensors: vec![
                (
                    "TC_NOZZLE".to_owned(),
                    vec![(1.0, 21.5), (2.0, 22.0)],
                ),
                ("PT_FUEL".to_owned(), vec![(1.0, 300.0), (1.5, 310.0)]),
            ],
        }
    }

    #[test]
    fn rows_are_the_sorted_union_of_timestamps() {
        let mut out = Vec::new();
        write_csv_to(&dump(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "time_seconds,TC_NOZZLE,PT_FUEL");
        assert_eq!(lines[1], "1.000,21.5,300");
        assert_eq!(lines[2], "1.500,,310");
        assert_eq!(lines[3], "2.000,22,");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn empty_dump_produces_header_only() {
        let empty = SampleDump {
            device_name: "D".to_owned(),
            sensors: vec![("S".to_owned(), vec![])],
        };
        let mut out = Vec::new();
        write_csv_to(&empty, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "time_seconds,S\n");
    }

    #[test]
    fn file_name_carries_device_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dump(), dir.path()).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("EngineStand_"));
        assert!(name.ends_with(".csv"));
        // YYYYMMDD-HHMMSS is 15 characters.
        assert_eq!(name.len(), "EngineStand_".len() + 15 + ".csv".len());
        assert!(path.exists());
    }
}
