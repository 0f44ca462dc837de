use std::fmt::{Display, Formatter};
use std::path::Path;

use ahash::HashMap;
use geo::LineString;

pub mod features;
pub mod io;

pub use io::ParseError;

/// Turn direction of a connection as classified by the network description (`dir` attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Straight,
    Left,
    Right,
    PartialLeft,
    PartialRight,
    Turn,
    Invalid,
}

impl Direction {
    pub fn from_code(code: &str) -> Option<Direction> {
        match code {
            "s" => Some(Direction::Straight),
            "l" => Some(Direction::Left),
            "r" => Some(Direction::Right),
            "L" => Some(Direction::PartialLeft),
            "R" => Some(Direction::PartialRight),
            "t" => Some(Direction::Turn),
            "invalid" => Some(Direction::Invalid),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Direction::Straight => "s",
            Direction::Left => "l",
            Direction::Right => "r",
            Direction::PartialLeft => "L",
            Direction::PartialRight => "R",
            Direction::Turn => "t",
            Direction::Invalid => "invalid",
        }
    }

    /// Neither a U-turn nor a full left or right turn.
    pub fn is_through(&self) -> bool {
        !matches!(self, Direction::Turn | Direction::Left | Direction::Right)
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JunctionControl {
    Signalized,
    Unsignalized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lane {
    pub id: String,
    pub index: usize,
    pub speed: f64,
    pub length: f64,
    pub shape: LineString<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: String,
    pub name: Option<String>,
    pub from: String,
    pub to: String,
    pub priority: i32,
    pub edge_type: String,
    pub shape: LineString<f64>,
    /// Ordered by lane index, which is contiguous from 0.
    pub lanes: Vec<Lane>,
    /// Indices into [`Network::connections`] ending on this edge.
    pub incoming: Vec<usize>,
    /// Indices into [`Network::connections`] leaving this edge.
    pub outgoing: Vec<usize>,
}

impl Edge {
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Free-flow speed, taken from the first lane.
    pub fn speed(&self) -> f64 {
        self.lanes.first().map_or(0., |l| l.speed)
    }

    /// Length of the first lane. Lanes of a normal edge share one length, so any lane would do.
    pub fn length(&self) -> f64 {
        self.lanes.first().map_or(0., |l| l.length)
    }

    pub fn lane(&self, index: usize) -> Option<&Lane> {
        self.lanes.get(index)
    }
}

/// Right-of-way entry of one connection at its junction.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub index: usize,
    /// Connections this one yields to.
    pub response: String,
    /// Connections conflicting with this one.
    pub foes: String,
}

impl Request {
    pub fn response_count(&self) -> usize {
        self.response.chars().filter(|c| *c == '1').count()
    }

    pub fn foe_count(&self) -> usize {
        self.foes.chars().filter(|c| *c == '1').count()
    }

    /// Bit-strings are written with connection 0 as the rightmost character.
    pub fn is_foe(&self, other: usize) -> bool {
        bit_at(&self.foes, other)
    }

    pub fn must_yield_to(&self, other: usize) -> bool {
        bit_at(&self.response, other)
    }
}

fn bit_at(bits: &str, index: usize) -> bool {
    let bytes = bits.as_bytes();
    index < bytes.len() && bytes[bytes.len() - 1 - index] == b'1'
}

#[derive(Debug, Clone, PartialEq)]
pub struct Junction {
    pub id: String,
    pub junction_type: String,
    pub x: f64,
    pub y: f64,
    /// Indices into [`Network::connections`], ordered by their sequence number at this junction.
    pub connections: Vec<usize>,
    /// `requests[i]` belongs to the connection with sequence number `i`. Empty for unregulated
    /// junctions.
    pub requests: Vec<Request>,
}

impl Junction {
    pub fn control(&self) -> JunctionControl {
        if self.junction_type.starts_with("traffic_light") {
            JunctionControl::Signalized
        } else {
            JunctionControl::Unsignalized
        }
    }

    pub fn is_signalized(&self) -> bool {
        self.control() == JunctionControl::Signalized
    }

    /// Number of links in the right-of-way logic, pedestrian crossings included. Zero for
    /// junctions without logic.
    pub fn size(&self) -> usize {
        self.requests.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub from_edge: usize,
    pub from_lane: usize,
    pub to_edge: usize,
    pub to_lane: usize,
    pub direction: Direction,
    pub state: char,
    pub junction: usize,
    /// Position of this connection among all connections of its junction, in declaration order.
    pub sequence: usize,
    /// Smallest distance between the from-lane and to-lane centerlines.
    pub gap: Option<f64>,
}

/// Read-only index over a parsed road network.
#[derive(Debug, Default)]
pub struct Network {
    pub edges: Vec<Edge>,
    pub junctions: Vec<Junction>,
    pub connections: Vec<Connection>,
    edge_ids: HashMap<String, usize>,
    junction_ids: HashMap<String, usize>,
}

impl Network {
    pub fn from_file(path: &Path) -> Result<Network, ParseError> {
        io::from_file(path)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edge_ids.get(id).map(|i| &self.edges[*i])
    }

    pub fn edge_index(&self, id: &str) -> Option<usize> {
        self.edge_ids.get(id).copied()
    }

    pub fn junction(&self, id: &str) -> Option<&Junction> {
        self.junction_ids.get(id).map(|i| &self.junctions[*i])
    }

    pub fn from_edge(&self, connection: &Connection) -> &Edge {
        &self.edges[connection.from_edge]
    }

    pub fn to_edge(&self, connection: &Connection) -> &Edge {
        &self.edges[connection.to_edge]
    }

    pub fn junction_of(&self, connection: &Connection) -> &Junction {
        &self.junctions[connection.junction]
    }

    pub fn request(&self, connection: &Connection) -> Option<&Request> {
        self.junction_of(connection)
            .requests
            .get(connection.sequence)
    }

    pub fn junction_connections<'a>(
        &'a self,
        junction: &'a Junction,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        junction.connections.iter().map(|i| &self.connections[*i])
    }

    pub fn incoming_connections<'a>(
        &'a self,
        edge: &'a Edge,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        edge.incoming.iter().map(|i| &self.connections[*i])
    }

    pub(crate) fn push_edge(&mut self, edge: Edge) {
        self.edge_ids.insert(edge.id.clone(), self.edges.len());
        self.edges.push(edge);
    }

    pub(crate) fn push_junction(&mut self, junction: Junction) {
        self.junction_ids
            .insert(junction.id.clone(), self.junctions.len());
        self.junctions.push(junction);
    }

    pub(crate) fn junction_index(&self, id: &str) -> Option<usize> {
        self.junction_ids.get(id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::{Direction, Request};

    #[test]
    fn through_directions() {
        assert!(Direction::Straight.is_through());
        assert!(Direction::PartialLeft.is_through());
        assert!(Direction::PartialRight.is_through());
        assert!(!Direction::Left.is_through());
        assert!(!Direction::Right.is_through());
        assert!(!Direction::Turn.is_through());
    }

    #[test]
    fn direction_codes() {
        for code in ["s", "l", "r", "L", "R", "t", "invalid"] {
            assert_eq!(code, Direction::from_code(code).unwrap().code());
        }
        assert_eq!(None, Direction::from_code("x"));
    }

    #[test]
    fn request_bits_are_read_right_to_left() {
        let request = Request {
            index: 0,
            response: "0010".to_string(),
            foes: "0110".to_string(),
        };
        assert_eq!(1, request.response_count());
        assert_eq!(2, request.foe_count());
        assert!(!request.is_foe(0));
        assert!(request.is_foe(1));
        assert!(request.is_foe(2));
        assert!(!request.is_foe(3));
        assert!(!request.is_foe(7));
        assert!(request.must_yield_to(1));
        assert!(!request.must_yield_to(2));
    }
}
