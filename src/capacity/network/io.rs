use std::io::Read;
use std::path::{Path, PathBuf};

#[allow(deprecated)]
use geo::EuclideanDistance;
use geo::{Coord, LineString};
use tracing::{debug, info};
use xml::attribute::OwnedAttribute;
use xml::reader::{ParserConfig, XmlEvent};

use crate::capacity::io::open_reader;
use crate::capacity::io::xml::{attribute, parse_attribute};
use crate::capacity::network::{Connection, Direction, Edge, Junction, Lane, Network, Request};

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("could not read network file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed network xml: {0}")]
    Xml(#[from] xml::reader::Error),
    #[error("unsupported network file {0:?}. Use `.xml` or `.xml.gz`")]
    UnsupportedFormat(PathBuf),
    #[error("<{element}> is missing attribute '{attribute}'")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    #[error("<{element}> has invalid value '{value}' for attribute '{attribute}'")]
    InvalidValue {
        element: &'static str,
        attribute: &'static str,
        value: String,
    },
    #[error("edge {edge} has no lanes or non-contiguous lane indices")]
    LaneIndex { edge: String },
    #[error("connection {connection} references unknown {missing}")]
    DanglingReference { connection: String, missing: String },
    #[error("junction {junction} declares {requests} requests but has {connections} connections")]
    RequestMismatch {
        junction: String,
        requests: usize,
        connections: usize,
    },
    #[error("request {index} of junction {junction} has bit-strings of length {length}, expected {expected}")]
    RequestLength {
        junction: String,
        index: usize,
        length: usize,
        expected: usize,
    },
}

pub fn from_file(path: &Path) -> Result<Network, ParseError> {
    let name = path.to_string_lossy();
    if !(name.ends_with(".xml") || name.ends_with(".xml.gz")) {
        return Err(ParseError::UnsupportedFormat(path.to_path_buf()));
    }
    info!("Starting to read network at: {path:?}");
    let network = from_reader(open_reader(path)?)?;
    info!(
        "Finished reading network. It contains {} edges, {} junctions and {} connections.",
        network.edges.len(),
        network.junctions.len(),
        network.connections.len()
    );
    Ok(network)
}

struct PendingConnection {
    from: String,
    to: String,
    from_lane: usize,
    to_lane: usize,
    direction: Direction,
    state: char,
}

impl PendingConnection {
    fn describe(&self) -> String {
        format!(
            "{}_{} -> {}_{}",
            self.from, self.from_lane, self.to, self.to_lane
        )
    }
}

/// Streams through the network description. Only edges, lanes, junctions, requests and
/// connections are kept; everything else is skipped without being materialized.
pub fn from_reader<R: Read>(reader: R) -> Result<Network, ParseError> {
    let parser = ParserConfig::new()
        .trim_whitespace(true)
        .create_reader(reader);

    let mut network = Network::default();
    let mut current_edge: Option<Edge> = None;
    let mut current_junction: Option<Junction> = None;
    let mut pending = Vec::new();
    let mut skipped_internal = 0usize;

    for event in parser {
        match event? {
            XmlEvent::StartElement {
                name, attributes, ..
            } => match name.local_name.as_str() {
                "edge" => match attribute(&attributes, "function") {
                    None | Some("normal") | Some("connector") => {
                        current_edge = Some(parse_edge(&attributes)?);
                    }
                    // internal, crossing and walkingarea edges have no end junctions
                    Some(_) => skipped_internal += 1,
                },
                "lane" => {
                    if let Some(edge) = current_edge.as_mut() {
                        edge.lanes.push(parse_lane(&attributes)?);
                    }
                }
                "junction" => {
                    if attribute(&attributes, "type") != Some("internal") {
                        current_junction = Some(parse_junction(&attributes)?);
                    }
                }
                "request" => {
                    if let Some(junction) = current_junction.as_mut() {
                        let request = parse_request(&attributes, junction.requests.len())?;
                        junction.requests.push(request);
                    }
                }
                "connection" => {
                    let from = required(&attributes, "connection", "from")?;
                    let to = required(&attributes, "connection", "to")?;
                    // connections from or into junction-interior lanes are not movements
                    if !from.starts_with(':') && !to.starts_with(':') {
                        pending.push(parse_connection(&attributes)?);
                    }
                }
                _ => {}
            },
            XmlEvent::EndElement { name } => match name.local_name.as_str() {
                "edge" => {
                    if let Some(edge) = current_edge.take() {
                        network.push_edge(finish_edge(edge)?);
                    }
                }
                "junction" => {
                    if let Some(mut junction) = current_junction.take() {
                        junction.requests.sort_by_key(|r| r.index);
                        network.push_junction(junction);
                    }
                }
                _ => {}
            },
            XmlEvent::EndDocument => break,
            _ => {}
        }
    }

    debug!("Skipped {skipped_internal} internal, crossing and walking area edges.");
    resolve_connections(&mut network, pending)?;
    validate_requests(&network)?;
    Ok(network)
}

fn resolve_connections(
    network: &mut Network,
    pending: Vec<PendingConnection>,
) -> Result<(), ParseError> {
    for p in pending {
        let dangling = |missing: String| ParseError::DanglingReference {
            connection: p.describe(),
            missing,
        };

        let from_edge = network
            .edge_index(&p.from)
            .ok_or_else(|| dangling(format!("edge {}", p.from)))?;
        let to_edge = network
            .edge_index(&p.to)
            .ok_or_else(|| dangling(format!("edge {}", p.to)))?;
        let from_lane = network.edges[from_edge]
            .lane(p.from_lane)
            .ok_or_else(|| dangling(format!("lane {}_{}", p.from, p.from_lane)))?;
        let to_lane = network.edges[to_edge]
            .lane(p.to_lane)
            .ok_or_else(|| dangling(format!("lane {}_{}", p.to, p.to_lane)))?;
        let junction_id = &network.edges[from_edge].to;
        let junction = network
            .junction_index(junction_id)
            .ok_or_else(|| dangling(format!("junction {junction_id}")))?;

        let gap = centerline_gap(&from_lane.shape, &to_lane.shape);
        let index = network.connections.len();
        let sequence = network.junctions[junction].connections.len();

        network.connections.push(Connection {
            from_edge,
            from_lane: p.from_lane,
            to_edge,
            to_lane: p.to_lane,
            direction: p.direction,
            state: p.state,
            junction,
            sequence,
            gap,
        });
        network.edges[from_edge].outgoing.push(index);
        network.edges[to_edge].incoming.push(index);
        network.junctions[junction].connections.push(index);
    }
    Ok(())
}

/// Junctions without right-of-way logic (`unregulated`) declare no requests. Otherwise every
/// connection needs a request. Pedestrian crossings take the link indices after the vehicle
/// connections, so a junction may declare more requests than it has connections.
fn validate_requests(network: &Network) -> Result<(), ParseError> {
    for junction in &network.junctions {
        let connections = junction.connections.len();
        let logic_size = junction.requests.len();
        if logic_size == 0 {
            continue;
        }
        if logic_size < connections {
            return Err(ParseError::RequestMismatch {
                junction: junction.id.clone(),
                requests: junction.requests.len(),
                connections,
            });
        }
        for (position, request) in junction.requests.iter().enumerate() {
            if request.index != position {
                return Err(ParseError::RequestMismatch {
                    junction: junction.id.clone(),
                    requests: junction.requests.len(),
                    connections,
                });
            }
            for bits in [&request.foes, &request.response] {
                if bits.len() != logic_size {
                    return Err(ParseError::RequestLength {
                        junction: junction.id.clone(),
                        index: request.index,
                        length: bits.len(),
                        expected: logic_size,
                    });
                }
            }
        }
    }
    Ok(())
}

#[allow(deprecated)]
fn centerline_gap(from: &LineString<f64>, to: &LineString<f64>) -> Option<f64> {
    if from.0.len() < 2 || to.0.len() < 2 {
        return None;
    }
    Some(from.euclidean_distance(to))
}

fn parse_edge(attributes: &[OwnedAttribute]) -> Result<Edge, ParseError> {
    Ok(Edge {
        id: required(attributes, "edge", "id")?.to_string(),
        name: attribute(attributes, "name").map(str::to_string),
        from: required(attributes, "edge", "from")?.to_string(),
        to: required(attributes, "edge", "to")?.to_string(),
        priority: optional(attributes, "edge", "priority")?.unwrap_or(-1),
        edge_type: attribute(attributes, "type").unwrap_or_default().to_string(),
        shape: optional_shape(attributes, "edge")?,
        lanes: Vec::new(),
        incoming: Vec::new(),
        outgoing: Vec::new(),
    })
}

fn finish_edge(mut edge: Edge) -> Result<Edge, ParseError> {
    edge.lanes.sort_by_key(|l| l.index);
    if edge.lanes.is_empty() || edge.lanes.iter().enumerate().any(|(i, l)| l.index != i) {
        return Err(ParseError::LaneIndex { edge: edge.id });
    }
    if edge.shape.0.is_empty() {
        if let Some(lane) = edge.lanes.first() {
            edge.shape = lane.shape.clone();
        }
    }
    Ok(edge)
}

fn parse_lane(attributes: &[OwnedAttribute]) -> Result<Lane, ParseError> {
    Ok(Lane {
        id: required(attributes, "lane", "id")?.to_string(),
        index: number(attributes, "lane", "index")?,
        speed: number(attributes, "lane", "speed")?,
        length: number(attributes, "lane", "length")?,
        shape: optional_shape(attributes, "lane")?,
    })
}

fn parse_junction(attributes: &[OwnedAttribute]) -> Result<Junction, ParseError> {
    Ok(Junction {
        id: required(attributes, "junction", "id")?.to_string(),
        junction_type: attribute(attributes, "type").unwrap_or_default().to_string(),
        x: optional(attributes, "junction", "x")?.unwrap_or(0.),
        y: optional(attributes, "junction", "y")?.unwrap_or(0.),
        connections: Vec::new(),
        requests: Vec::new(),
    })
}

fn parse_request(attributes: &[OwnedAttribute], position: usize) -> Result<Request, ParseError> {
    Ok(Request {
        index: optional(attributes, "request", "index")?.unwrap_or(position),
        response: required(attributes, "request", "response")?.to_string(),
        foes: required(attributes, "request", "foes")?.to_string(),
    })
}

fn parse_connection(attributes: &[OwnedAttribute]) -> Result<PendingConnection, ParseError> {
    let dir = attribute(attributes, "dir").unwrap_or("invalid");
    let direction = Direction::from_code(dir).ok_or_else(|| ParseError::InvalidValue {
        element: "connection",
        attribute: "dir",
        value: dir.to_string(),
    })?;

    Ok(PendingConnection {
        from: required(attributes, "connection", "from")?.to_string(),
        to: required(attributes, "connection", "to")?.to_string(),
        from_lane: number(attributes, "connection", "fromLane")?,
        to_lane: number(attributes, "connection", "toLane")?,
        direction,
        state: attribute(attributes, "state")
            .and_then(|s| s.chars().next())
            .unwrap_or('o'),
    })
}

fn required<'a>(
    attributes: &'a [OwnedAttribute],
    element: &'static str,
    name: &'static str,
) -> Result<&'a str, ParseError> {
    attribute(attributes, name).ok_or(ParseError::MissingAttribute {
        element,
        attribute: name,
    })
}

fn number<T: std::str::FromStr>(
    attributes: &[OwnedAttribute],
    element: &'static str,
    name: &'static str,
) -> Result<T, ParseError> {
    optional(attributes, element, name)?.ok_or(ParseError::MissingAttribute {
        element,
        attribute: name,
    })
}

fn optional<T: std::str::FromStr>(
    attributes: &[OwnedAttribute],
    element: &'static str,
    name: &'static str,
) -> Result<Option<T>, ParseError> {
    parse_attribute(attributes, name)
        .transpose()
        .map_err(|value| ParseError::InvalidValue {
            element,
            attribute: name,
            value,
        })
}

fn optional_shape(
    attributes: &[OwnedAttribute],
    element: &'static str,
) -> Result<LineString<f64>, ParseError> {
    match attribute(attributes, "shape") {
        None => Ok(LineString::new(Vec::new())),
        Some(raw) => parse_shape(raw).ok_or_else(|| ParseError::InvalidValue {
            element,
            attribute: "shape",
            value: raw.to_string(),
        }),
    }
}

/// Parses `"x,y x,y ..."`. A third (z) component is accepted and dropped.
fn parse_shape(raw: &str) -> Option<LineString<f64>> {
    raw.split_whitespace()
        .map(|point| {
            let mut parts = point.split(',');
            let x = parts.next()?.parse().ok()?;
            let y = parts.next()?.parse().ok()?;
            Some(Coord { x, y })
        })
        .collect::<Option<Vec<_>>>()
        .map(LineString::new)
}
