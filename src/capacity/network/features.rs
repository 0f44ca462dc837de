//! Tabular per-connection and per-edge attributes of a network, used as input features for
//! capacity models.

use serde::Serialize;

use crate::capacity::network::Network;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionFeatures {
    pub junction_id: String,
    pub from_edge_id: String,
    pub to_edge_id: String,
    pub from_lane_id: String,
    pub to_lane_id: String,
    pub dir: String,
    pub state: char,
    pub edge_type: String,
    pub from_length: f64,
    pub num_lanes: usize,
    pub num_response: usize,
    pub num_foes: usize,
    pub conn_distance: Option<f64>,
    pub priority: i32,
    pub speed: f64,
    pub junction_type: String,
    pub junction_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeFeatures {
    pub edge_id: String,
    pub name: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub speed: f64,
    pub length: f64,
    pub num_lanes: usize,
    pub from_type: Option<String>,
    pub to_type: Option<String>,
}

pub fn connection_features(network: &Network) -> Vec<ConnectionFeatures> {
    network
        .connections
        .iter()
        .map(|c| {
            let from = network.from_edge(c);
            let to = network.to_edge(c);
            let from_lane = &from.lanes[c.from_lane];
            let junction = network.junction_of(c);
            let request = network.request(c);

            ConnectionFeatures {
                junction_id: junction.id.clone(),
                from_edge_id: from.id.clone(),
                to_edge_id: to.id.clone(),
                from_lane_id: from_lane.id.clone(),
                to_lane_id: to.lanes[c.to_lane].id.clone(),
                dir: c.direction.code().to_string(),
                state: c.state,
                edge_type: from.edge_type.clone(),
                from_length: from_lane.length,
                num_lanes: from.lane_count(),
                num_response: request.map_or(0, |r| r.response_count()),
                num_foes: request.map_or(0, |r| r.foe_count()),
                conn_distance: c.gap,
                priority: from.priority,
                speed: from_lane.speed,
                junction_type: junction.junction_type.clone(),
                junction_size: junction.size(),
            }
        })
        .collect()
}

pub fn edge_features(network: &Network) -> Vec<EdgeFeatures> {
    network
        .edges
        .iter()
        .map(|e| EdgeFeatures {
            edge_id: e.id.clone(),
            name: e.name.clone().unwrap_or_default(),
            from: e.from.clone(),
            to: e.to.clone(),
            edge_type: e.edge_type.clone(),
            speed: e.speed(),
            length: e.length(),
            num_lanes: e.lane_count(),
            from_type: network.junction(&e.from).map(|j| j.junction_type.clone()),
            to_type: network.junction(&e.to).map(|j| j.junction_type.clone()),
        })
        .collect()
}
