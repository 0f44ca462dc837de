//! Turns windowed induction loop counts into hourly flows.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;
use xml::reader::{ParserConfig, XmlEvent};

use crate::capacity::io::open_reader;
use crate::capacity::io::xml::parse_attribute;

/// Intervals starting before this simulated second are discarded.
pub const WARM_UP: f64 = 60.0;

#[derive(thiserror::Error, Debug)]
pub enum AggregationError {
    #[error("no detector data after the warm-up period in {0:?}")]
    NoData(PathBuf),
    #[error("could not read detector output: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed detector output: {0}")]
    Xml(#[from] xml::reader::Error),
    #[error("<interval> is missing or has invalid attribute '{attribute}' in {path:?}")]
    InvalidInterval { path: PathBuf, attribute: &'static str },
}

/// One output interval of a detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSample {
    pub begin: f64,
    pub end: f64,
    /// Vehicles that passed the detector during the interval.
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub count: u64,
    /// Veh/h.
    pub flow: f64,
}

impl Throughput {
    fn add(self, other: Throughput) -> Throughput {
        Throughput {
            count: self.count + other.count,
            flow: self.flow + other.flow,
        }
    }
}

/// Reads all `<interval>` elements of a detector output document in document order.
pub fn read_samples<R: Read>(reader: R, path: &Path) -> Result<Vec<DetectorSample>, AggregationError> {
    let parser = ParserConfig::new()
        .trim_whitespace(true)
        .create_reader(reader);

    let invalid = |attribute: &'static str| AggregationError::InvalidInterval {
        path: path.to_path_buf(),
        attribute,
    };

    let mut samples = Vec::new();
    for event in parser {
        match event? {
            XmlEvent::StartElement {
                name, attributes, ..
            } if name.local_name == "interval" => {
                let begin: f64 = parse_attribute(&attributes, "begin")
                    .and_then(Result::ok)
                    .ok_or_else(|| invalid("begin"))?;
                let end: f64 = parse_attribute(&attributes, "end")
                    .and_then(Result::ok)
                    .ok_or_else(|| invalid("end"))?;
                let count: f64 = parse_attribute(&attributes, "nVehContrib")
                    .and_then(Result::ok)
                    .ok_or_else(|| invalid("nVehContrib"))?;
                samples.push(DetectorSample {
                    begin,
                    end,
                    count: count.round() as u64,
                });
            }
            XmlEvent::EndDocument => break,
            _ => {}
        }
    }
    Ok(samples)
}

/// Sums the counts of all intervals beginning at or after the warm-up and scales them to an
/// hourly rate over the observed span. The span ends with the last interval, which may be earlier
/// than the configured end if the simulation stopped early.
pub fn aggregate(samples: &[DetectorSample]) -> Option<Throughput> {
    let last_end = samples.last()?.end;
    let span = last_end - WARM_UP;
    let mut surviving = samples.iter().filter(|s| s.begin >= WARM_UP).peekable();
    if span <= 0. || surviving.peek().is_none() {
        return None;
    }

    let count: u64 = surviving.map(|s| s.count).sum();
    Some(Throughput {
        count,
        flow: count as f64 * 3600. / span,
    })
}

pub fn aggregate_file(path: &Path) -> Result<Throughput, AggregationError> {
    let samples = read_samples(open_reader(path)?, path)?;
    aggregate(&samples).ok_or_else(|| AggregationError::NoData(path.to_path_buf()))
}

/// Sums flows and counts over all `.xml` files in `dir`, one per measured lane. Every file must
/// contain data.
pub fn aggregate_dir(dir: &Path) -> Result<Throughput, AggregationError> {
    let mut files = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    files.retain(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "xml"));
    files.sort();

    let mut total: Option<Throughput> = None;
    for file in &files {
        let throughput = aggregate_file(file)?;
        debug!("{file:?}: {} vehicles, {:.1} veh/h", throughput.count, throughput.flow);
        total = Some(match total {
            Some(t) => t.add(throughput),
            None => throughput,
        });
    }
    total.ok_or_else(|| AggregationError::NoData(dir.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use assert_approx_eq::assert_approx_eq;

    use super::{aggregate, aggregate_dir, read_samples, AggregationError, DetectorSample};

    fn samples(raw: &[(f64, f64, u64)]) -> Vec<DetectorSample> {
        raw.iter()
            .map(|(begin, end, count)| DetectorSample {
                begin: *begin,
                end: *end,
                count: *count,
            })
            .collect()
    }

    fn detector_output(intervals: &[(f64, f64, u64)]) -> String {
        let mut text = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<detector>\n");
        for (begin, end, count) in intervals {
            text.push_str(&format!(
                "    <interval begin=\"{begin:.2}\" end=\"{end:.2}\" id=\"detector_0\" nVehContrib=\"{count}\" flow=\"0.00\"/>\n"
            ));
        }
        text.push_str("</detector>\n");
        text
    }

    #[test]
    fn warm_up_is_discarded() {
        let result = aggregate(&samples(&[(0., 60., 5), (60., 120., 10), (120., 180., 15)])).unwrap();
        assert_eq!(25, result.count);
        assert_approx_eq!(750.0, result.flow);
    }

    #[test]
    fn single_interval_after_warm_up() {
        let result = aggregate(&samples(&[(60., 120., 8)])).unwrap();
        assert_eq!(8, result.count);
        assert_approx_eq!(480.0, result.flow);
    }

    #[test]
    fn nothing_after_warm_up_is_no_data() {
        assert_eq!(None, aggregate(&[]));
        assert_eq!(None, aggregate(&samples(&[(0., 10., 1), (50., 60., 3)])));
    }

    #[test]
    fn reads_intervals() {
        let text = detector_output(&[(0., 10., 2), (10., 20., 4)]);
        let samples = read_samples(text.as_bytes(), Path::new("lane_0.xml")).unwrap();
        assert_eq!(
            vec![
                DetectorSample {
                    begin: 0.,
                    end: 10.,
                    count: 2
                },
                DetectorSample {
                    begin: 10.,
                    end: 20.,
                    count: 4
                }
            ],
            samples
        );
    }

    #[test]
    fn invalid_interval_is_reported() {
        let text = "<detector><interval begin=\"0\" end=\"x\" nVehContrib=\"1\"/></detector>";
        assert!(matches!(
            read_samples(text.as_bytes(), Path::new("lane_0.xml")),
            Err(AggregationError::InvalidInterval {
                attribute: "end",
                ..
            })
        ));
    }

    #[test]
    fn lanes_are_summed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("lane_0.xml"),
            detector_output(&[(50., 60., 9), (60., 120., 10), (120., 180., 20)]),
        )
        .unwrap();
        fs::write(
            dir.path().join("lane_1.xml"),
            detector_output(&[(60., 120., 8)]),
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let result = aggregate_dir(dir.path()).unwrap();
        assert_eq!(38, result.count);
        assert_approx_eq!(30. * 3600. / 120. + 480., result.flow);
    }

    #[test]
    fn empty_lane_makes_point_unusable() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("lane_0.xml"),
            detector_output(&[(60., 120., 10)]),
        )
        .unwrap();
        fs::write(dir.path().join("lane_1.xml"), detector_output(&[])).unwrap();

        assert!(matches!(
            aggregate_dir(dir.path()),
            Err(AggregationError::NoData(_))
        ));

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            aggregate_dir(empty.path()),
            Err(AggregationError::NoData(_))
        ));
    }
}
