use serde::Serialize;

use crate::capacity::network::Edge;

/// Simulated seconds aggregated into one detector output interval.
pub const SAMPLING_INTERVAL: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename = "additional")]
pub struct Additional {
    #[serde(rename = "e1Detector")]
    pub detectors: Vec<InductionLoop>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InductionLoop {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@lane")]
    pub lane: String,
    /// Negative positions are measured back from the lane end.
    #[serde(rename = "@pos")]
    pub pos: f64,
    #[serde(rename = "@friendlyPos")]
    pub friendly_pos: bool,
    #[serde(rename = "@freq")]
    pub freq: f64,
    #[serde(rename = "@file")]
    pub file: String,
}

/// One induction loop per lane of `edge`, `offset` metres before the lane end. Detector `i` is
/// called `<id_prefix>_<i>` and writes to `<output_dir>/<file_prefix>_<i>.xml`, relative to the
/// additional file.
pub fn lane_detectors(
    edge: &Edge,
    offset: f64,
    id_prefix: &str,
    file_prefix: &str,
    output_dir: &str,
) -> Additional {
    let detectors = edge
        .lanes
        .iter()
        .map(|lane| InductionLoop {
            id: format!("{id_prefix}_{}", lane.index),
            lane: lane.id.clone(),
            pos: -offset,
            friendly_pos: true,
            freq: SAMPLING_INTERVAL,
            file: format!("{output_dir}/{file_prefix}_{}.xml", lane.index),
        })
        .collect();
    Additional { detectors }
}

#[cfg(test)]
mod tests {
    use geo::LineString;

    use super::lane_detectors;
    use crate::capacity::io::xml::to_string;
    use crate::capacity::network::{Edge, Lane};

    fn edge_with_lanes(n: usize) -> Edge {
        Edge {
            id: "E1".to_string(),
            name: None,
            from: "A".to_string(),
            to: "B".to_string(),
            priority: 1,
            edge_type: String::new(),
            shape: LineString::new(vec![]),
            lanes: (0..n)
                .map(|i| Lane {
                    id: format!("E1_{i}"),
                    index: i,
                    speed: 13.89,
                    length: 100.,
                    shape: LineString::new(vec![]),
                })
                .collect(),
            incoming: vec![],
            outgoing: vec![],
        }
    }

    #[test]
    fn one_detector_per_lane() {
        let additional = lane_detectors(&edge_with_lanes(3), 15., "E1", "E1", "detector");

        assert_eq!(3, additional.detectors.len());
        let last = &additional.detectors[2];
        assert_eq!("E1_2", last.id);
        assert_eq!("E1_2", last.lane);
        assert_eq!(-15., last.pos);
        assert_eq!(10., last.freq);
        assert_eq!("detector/E1_2.xml", last.file);
    }

    #[test]
    fn detector_xml() {
        let text = to_string(&lane_detectors(&edge_with_lanes(1), 1., "detector", "lane", "detector")).unwrap();
        assert!(text.contains(
            "<e1Detector id=\"detector_0\" lane=\"E1_0\" pos=\"-1\" friendlyPos=\"true\" freq=\"10\" file=\"detector/lane_0.xml\"/>"
        ));
    }
}
