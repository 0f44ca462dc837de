use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use geo::{BoundingRect, LineString};
use tracing::debug;

use crate::capacity::network::{Edge, Junction, Network};

/// Distance added on every side of the entity's bounding box before cropping.
pub const EXTRACTION_MARGIN: f64 = 50.0;

#[derive(thiserror::Error, Debug)]
pub enum ExternalToolError {
    #[error("could not start {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },
    #[error("{tool} failed with {status}")]
    Failed { tool: String, status: ExitStatus },
}

/// Axis-aligned box in network coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Smallest box containing all `shapes`. `None` if there is no coordinate at all.
    pub fn around<'a>(shapes: impl IntoIterator<Item = &'a LineString<f64>>) -> Option<Self> {
        shapes
            .into_iter()
            .filter_map(|shape| shape.bounding_rect())
            .map(|rect| BoundingBox {
                min_x: rect.min().x,
                min_y: rect.min().y,
                max_x: rect.max().x,
                max_y: rect.max().y,
            })
            .reduce(|a, b| BoundingBox {
                min_x: a.min_x.min(b.min_x),
                min_y: a.min_y.min(b.min_y),
                max_x: a.max_x.max(b.max_x),
                max_y: a.max_y.max(b.max_y),
            })
    }

    pub fn expand(&self, margin: f64) -> Self {
        BoundingBox {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }
}

impl Display for BoundingBox {
    /// `minX,minY,maxX,maxY`
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

pub fn edge_boundary(edge: &Edge) -> Option<BoundingBox> {
    BoundingBox::around([&edge.shape]).map(|b| b.expand(EXTRACTION_MARGIN))
}

/// Box around every edge entering or leaving `junction` through one of its connections.
pub fn junction_boundary(network: &Network, junction: &Junction) -> Option<BoundingBox> {
    let shapes = network
        .junction_connections(junction)
        .flat_map(|c| [&network.from_edge(c).shape, &network.to_edge(c).shape]);
    BoundingBox::around(shapes).map(|b| b.expand(EXTRACTION_MARGIN))
}

#[derive(Debug, Clone)]
pub struct FilterRequest<'a> {
    pub source: &'a Path,
    pub boundary: BoundingBox,
    /// Keep junction-interior lanes. Required when movements through a junction are simulated.
    pub keep_internal_links: bool,
    pub output: &'a Path,
}

/// Crops a network file to a region and writes the reduced network.
pub trait NetworkFilter {
    fn filter(&self, request: &FilterRequest) -> Result<(), ExternalToolError>;
}

/// Runs SUMO's `netconvert` as a child process.
#[derive(Debug, Clone)]
pub struct Netconvert {
    binary: PathBuf,
}

impl Netconvert {
    pub fn new(binary: PathBuf) -> Self {
        Netconvert { binary }
    }

    pub fn args(request: &FilterRequest) -> Vec<OsString> {
        vec![
            "-s".into(),
            request.source.into(),
            "--keep-edges.in-boundary".into(),
            request.boundary.to_string().into(),
            "--no-internal-links".into(),
            (!request.keep_internal_links).to_string().into(),
            "-o".into(),
            request.output.into(),
        ]
    }
}

impl NetworkFilter for Netconvert {
    fn filter(&self, request: &FilterRequest) -> Result<(), ExternalToolError> {
        let args = Netconvert::args(request);
        debug!("Calling {:?} with {:?}", self.binary, args);

        let tool = self.binary.to_string_lossy().to_string();
        let status = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::null())
            .status()
            .map_err(|source| ExternalToolError::Spawn {
                tool: tool.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ExternalToolError::Failed { tool, status })
        }
    }
}
