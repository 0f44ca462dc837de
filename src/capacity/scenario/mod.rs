//! Builds the self-contained simulation inputs of a single sweep point: demand, detectors and run
//! configuration, all bound to a cropped network in one work directory.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use tracing::debug;

use crate::capacity::config::ConfigError;
use crate::capacity::io::reset_dir;
use crate::capacity::io::xml::{write_to_file, XmlWriteError};
use crate::capacity::network::{Direction, Edge, Junction, Network};
use crate::capacity::scenario::demand::{routes, Flow, MixProfile, Routes};
use crate::capacity::scenario::detectors::{lane_detectors, Additional};
use crate::capacity::scenario::run_config::{RunConfiguration, RunTiming};

pub mod demand;
pub mod detectors;
pub mod extract;
pub mod run_config;

pub const NETWORK_FILE: &str = "filtered.net.xml";
pub const ROUTES_FILE: &str = "route.rou.xml";
pub const DETECTORS_FILE: &str = "detector.add.xml";
pub const CONFIG_FILE: &str = "scenario.sumocfg";
pub const DETECTOR_DIR: &str = "detector";

/// Approach edges shorter than this are extended by their straight-through predecessors.
pub const SHORT_APPROACH_LENGTH: f64 = 30.0;

pub const EDGE_RUN_DURATION: u32 = 600;
pub const JUNCTION_RUN_DURATION: u32 = 1800;

/// Offered demand on the measured movement, veh/h.
pub const TARGET_FLOW: f64 = 5000.0;
/// Offered demand on every other movement of the junction, veh/h.
pub const BACKGROUND_FLOW: f64 = 500.0;
/// Share of the estimated capacity offered to an edge before scaling.
pub const EDGE_DEMAND_FACTOR: f64 = 0.9;

const EDGE_DETECTOR_OFFSET: f64 = 15.0;
const JUNCTION_DETECTOR_OFFSET: f64 = 1.0;

#[derive(thiserror::Error, Debug)]
pub enum ScenarioError {
    #[error(transparent)]
    Write(#[from] XmlWriteError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0} has no geometry to crop the network around")]
    EmptyGeometry(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Locations of the artifacts of one scenario inside a work directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioFiles {
    pub network: PathBuf,
    pub routes: PathBuf,
    pub detectors: PathBuf,
    pub config: PathBuf,
    pub detector_output: PathBuf,
}

impl ScenarioFiles {
    pub fn in_dir(dir: &Path) -> Self {
        ScenarioFiles {
            network: dir.join(NETWORK_FILE),
            routes: dir.join(ROUTES_FILE),
            detectors: dir.join(DETECTORS_FILE),
            config: dir.join(CONFIG_FILE),
            detector_output: dir.join(DETECTOR_DIR),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub routes: Routes,
    pub detectors: Additional,
    pub run: RunConfiguration,
    pub timing: RunTiming,
}

impl Scenario {
    /// Replaces the demand, detector and run configuration files and empties the detector
    /// output directory. The cropped network is written separately by the extractor.
    pub fn write(&self, files: &ScenarioFiles) -> Result<(), ScenarioError> {
        write_to_file(&self.routes, &files.routes)?;
        write_to_file(&self.detectors, &files.detectors)?;
        write_to_file(&self.run, &files.config)?;
        reset_dir(&files.detector_output)?;
        debug!("Wrote scenario to {:?}", files.config);
        Ok(())
    }
}

/// Saturation flow of one lane in veh/h for free-flow speed `speed` in m/s, assuming a time gap
/// of 1.2 s and 7 m of vehicle length plus standstill gap.
pub fn capacity_estimate(speed: f64) -> f64 {
    let time_gap = 1.2;
    let vehicle_length = 7.0;
    3600. * speed / (speed * time_gap + vehicle_length)
}

/// Demand offered to `edge` at scale 1.
pub fn edge_demand(edge: &Edge) -> f64 {
    capacity_estimate(edge.speed()) * EDGE_DEMAND_FACTOR * edge.lane_count() as f64
}

/// Single flow along `edge`, measured 15 m before the end of each lane. The demand is scaled by
/// the simulator, so the scenario is the same for every sweep point.
pub fn edge_scenario(
    edge: &Edge,
    profile: &MixProfile,
    step_length: f64,
) -> Result<Scenario, ScenarioError> {
    let timing = RunTiming {
        duration: EDGE_RUN_DURATION,
        step_length,
    };
    let flow = Flow::new("veh", timing.duration, edge_demand(edge), edge.id.clone());

    Ok(Scenario {
        routes: routes(profile, vec![flow])?,
        detectors: lane_detectors(
            edge,
            EDGE_DETECTOR_OFFSET,
            &edge.id,
            &edge.id,
            DETECTOR_DIR,
        ),
        run: RunConfiguration::new(NETWORK_FILE, ROUTES_FILE, DETECTORS_FILE, timing),
        timing,
    })
}

/// A from-edge/to-edge pair through a junction. Both are indices into [`Network::edges`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Movement {
    pub from: usize,
    pub to: usize,
}

/// Distinct movements through `junction` excluding U-turns, in connection order.
pub fn movement_pairs(network: &Network, junction: &Junction) -> Vec<Movement> {
    network
        .junction_connections(junction)
        .filter(|c| c.direction != Direction::Turn)
        .map(|c| Movement {
            from: c.from_edge,
            to: c.to_edge,
        })
        .unique()
        .collect()
}

/// Routes feeding `movement`. A short from-edge is entered from each predecessor whose
/// connections into it are all straight-through, so a queue can build up before the junction.
pub fn approach_routes(network: &Network, movement: Movement) -> Vec<String> {
    let from = &network.edges[movement.from];
    let to = &network.edges[movement.to];

    let mut routes = Vec::new();
    if from.length() < SHORT_APPROACH_LENGTH {
        let predecessors = network
            .incoming_connections(from)
            .map(|c| c.from_edge)
            .unique()
            .collect_vec();
        for p in predecessors {
            let through = network
                .incoming_connections(from)
                .filter(|c| c.from_edge == p)
                .all(|c| c.direction.is_through());
            if through {
                routes.push(format!("{} {} {}", network.edges[p].id, from.id, to.id));
            }
        }
    }

    if routes.is_empty() {
        routes.push(format!("{} {}", from.id, to.id));
    }
    routes
}

/// Routes for the remaining movements of `junction` that neither share the from-edge nor the
/// to-edge of `movement`.
pub fn background_routes(network: &Network, junction: &Junction, movement: Movement) -> Vec<String> {
    network
        .junction_connections(junction)
        .filter(|c| c.direction != Direction::Turn)
        .filter(|c| c.from_edge != movement.from && c.to_edge != movement.to)
        .map(|c| format!("{} {}", network.from_edge(c).id, network.to_edge(c).id))
        .unique()
        .collect()
}

/// Saturates `movement` while every other movement carries light background traffic. Detectors
/// sit 1 m before the end of each lane of the from-edge.
pub fn junction_scenario(
    network: &Network,
    junction: &Junction,
    movement: Movement,
    profile: &MixProfile,
    step_length: f64,
) -> Result<Scenario, ScenarioError> {
    let timing = RunTiming {
        duration: JUNCTION_RUN_DURATION,
        step_length,
    };

    let target = approach_routes(network, movement)
        .into_iter()
        .enumerate()
        .map(|(i, edges)| Flow::new(format!("veh{i}"), timing.duration, TARGET_FLOW, edges));
    let background = background_routes(network, junction, movement)
        .into_iter()
        .enumerate()
        .map(|(i, edges)| {
            Flow::new(format!("vehx{i}"), timing.duration, BACKGROUND_FLOW, edges)
        });

    Ok(Scenario {
        routes: routes(profile, target.chain(background).collect())?,
        detectors: lane_detectors(
            &network.edges[movement.from],
            JUNCTION_DETECTOR_OFFSET,
            "detector",
            "lane",
            DETECTOR_DIR,
        ),
        run: RunConfiguration::new(NETWORK_FILE, ROUTES_FILE, DETECTORS_FILE, timing),
        timing,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use assert_approx_eq::assert_approx_eq;

    use super::{
        approach_routes, background_routes, capacity_estimate, edge_scenario, junction_scenario,
        movement_pairs, Movement, ScenarioFiles,
    };
    use crate::capacity::network::io::from_reader;
    use crate::capacity::network::Network;
    use crate::capacity::scenario::demand::{MixProfile, VehicleShares};

    /// Two predecessors P1 and P2 merge straight into F, which ends at junction C. At C, F
    /// continues to T (straight) and L (left), and S crosses to T (right) and U (straight).
    fn network(from_length: f64) -> Network {
        let xml = format!(
            r#"<net>
    <edge id="P1" from="A1" to="B" priority="2">
        <lane id="P1_0" index="0" speed="13.89" length="100.00" shape="-100.00,5.00 -{from_length},0.00"/>
    </edge>
    <edge id="P2" from="A2" to="B" priority="2">
        <lane id="P2_0" index="0" speed="13.89" length="100.00" shape="-100.00,-5.00 -{from_length},0.00"/>
    </edge>
    <edge id="F" from="B" to="C" priority="2">
        <lane id="F_0" index="0" speed="13.89" length="{from_length}" shape="-{from_length},0.00 0.00,0.00"/>
        <lane id="F_1" index="1" speed="13.89" length="{from_length}" shape="-{from_length},3.20 0.00,3.20"/>
    </edge>
    <edge id="T" from="C" to="D" priority="2">
        <lane id="T_0" index="0" speed="13.89" length="100.00" shape="10.00,0.00 110.00,0.00"/>
    </edge>
    <edge id="L" from="C" to="E" priority="2">
        <lane id="L_0" index="0" speed="13.89" length="100.00" shape="5.00,5.00 5.00,105.00"/>
    </edge>
    <edge id="S" from="G" to="C" priority="1">
        <lane id="S_0" index="0" speed="8.33" length="100.00" shape="5.00,-105.00 5.00,-5.00"/>
    </edge>
    <edge id="U" from="C" to="H" priority="1">
        <lane id="U_0" index="0" speed="8.33" length="100.00" shape="5.00,5.00 5.00,105.00"/>
    </edge>
    <junction id="B" type="priority" x="-{from_length}" y="0.00">
        <request index="0" response="00" foes="00" cont="0"/>
        <request index="1" response="00" foes="00" cont="0"/>
    </junction>
    <junction id="C" type="traffic_light" x="0.00" y="0.00">
        <request index="0" response="00000" foes="01100" cont="0"/>
        <request index="1" response="00000" foes="01000" cont="0"/>
        <request index="2" response="00011" foes="00011" cont="0"/>
        <request index="3" response="00001" foes="00001" cont="0"/>
        <request index="4" response="00000" foes="00000" cont="0"/>
    </junction>
    <connection from="P1" to="F" fromLane="0" toLane="1" dir="s" state="M"/>
    <connection from="P2" to="F" fromLane="0" toLane="0" dir="s" state="M"/>
    <connection from="F" to="T" fromLane="0" toLane="0" dir="s" state="O"/>
    <connection from="F" to="L" fromLane="1" toLane="0" dir="l" state="O"/>
    <connection from="S" to="T" fromLane="0" toLane="0" dir="r" state="O"/>
    <connection from="S" to="U" fromLane="0" toLane="0" dir="s" state="O"/>
    <connection from="F" to="F" fromLane="1" toLane="1" dir="t" state="O"/>
</net>"#
        );
        from_reader(xml.as_bytes()).unwrap()
    }

    fn movement(network: &Network, from: &str, to: &str) -> Movement {
        Movement {
            from: network.edge_index(from).unwrap(),
            to: network.edge_index(to).unwrap(),
        }
    }

    fn profile() -> MixProfile {
        MixProfile::from_shares("default", VehicleShares::new(1., 0., 0.))
    }

    #[test]
    fn short_approach_uses_predecessors() {
        let network = network(25.);
        let routes = approach_routes(&network, movement(&network, "F", "T"));
        assert_eq!(vec!["P1 F T", "P2 F T"], routes);
    }

    #[test]
    fn long_approach_is_used_directly() {
        let network = network(40.);
        let routes = approach_routes(&network, movement(&network, "F", "T"));
        assert_eq!(vec!["F T"], routes);
    }

    #[test]
    fn movements_skip_u_turns() {
        let network = network(40.);
        let junction = network.junction("C").unwrap();
        let pairs = movement_pairs(&network, junction);

        assert_eq!(
            vec![
                movement(&network, "F", "T"),
                movement(&network, "F", "L"),
                movement(&network, "S", "T"),
                movement(&network, "S", "U"),
            ],
            pairs
        );
    }

    #[test]
    fn background_avoids_target_edges() {
        let network = network(40.);
        let junction = network.junction("C").unwrap();

        let background = background_routes(&network, junction, movement(&network, "F", "T"));
        assert_eq!(vec!["S U"], background);

        let background = background_routes(&network, junction, movement(&network, "S", "U"));
        assert_eq!(vec!["F T", "F L"], background);
    }

    #[test]
    fn capacity_of_urban_lane() {
        // 50 km/h
        assert_approx_eq!(2112.73, capacity_estimate(13.89), 0.01);
    }

    #[test]
    fn edge_scenario_measures_every_lane() {
        let network = network(40.);
        let edge = network.edge("F").unwrap();
        let scenario = edge_scenario(edge, &profile(), 0.2).unwrap();

        assert_eq!(1, scenario.routes.flows.len());
        let flow = &scenario.routes.flows[0];
        assert_eq!("veh", flow.id);
        assert_eq!("F", flow.route.edges);
        assert_eq!(600, flow.end);
        assert_approx_eq!(capacity_estimate(13.89) * 0.9 * 2., flow.vehs_per_hour, 0.01);

        let ids: Vec<_> = scenario.detectors.detectors.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(vec!["F_0", "F_1"], ids);
        assert_eq!("detector/F_1.xml", scenario.detectors.detectors[1].file);
        assert_eq!(3000, scenario.timing.steps());
    }

    #[test]
    fn junction_scenario_flows() {
        let network = network(25.);
        let junction = network.junction("C").unwrap();
        let scenario = junction_scenario(
            &network,
            junction,
            movement(&network, "F", "T"),
            &profile(),
            0.2,
        )
        .unwrap();

        let flows: Vec<_> = scenario
            .routes
            .flows
            .iter()
            .map(|f| (f.id.as_str(), f.route.edges.as_str(), f.vehs_per_hour))
            .collect();
        assert_eq!(
            vec![
                ("veh0", "P1 F T", 5000.),
                ("veh1", "P2 F T", 5000.),
                ("vehx0", "S U", 500.)
            ],
            flows
        );
        assert_eq!("detector_1", scenario.detectors.detectors[1].id);
        assert_eq!("F_1", scenario.detectors.detectors[1].lane);
        assert_eq!(-1., scenario.detectors.detectors[1].pos);
        assert_eq!("detector/lane_1.xml", scenario.detectors.detectors[1].file);
        assert_eq!(9000, scenario.timing.steps());
    }

    #[test]
    fn writing_twice_gives_identical_files() {
        let network = network(25.);
        let junction = network.junction("C").unwrap();
        let build = || {
            junction_scenario(
                &network,
                junction,
                movement(&network, "F", "T"),
                &profile(),
                0.2,
            )
            .unwrap()
        };

        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let first_files = ScenarioFiles::in_dir(first.path());
        let second_files = ScenarioFiles::in_dir(second.path());
        build().write(&first_files).unwrap();
        build().write(&second_files).unwrap();

        for (a, b) in [
            (&first_files.routes, &second_files.routes),
            (&first_files.detectors, &second_files.detectors),
            (&first_files.config, &second_files.config),
        ] {
            assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
        }
        assert!(first_files.detector_output.is_dir());
    }

    #[test]
    fn writing_clears_old_detector_output() {
        let dir = tempfile::tempdir().unwrap();
        let files = ScenarioFiles::in_dir(dir.path());
        fs::create_dir_all(&files.detector_output).unwrap();
        fs::write(files.detector_output.join("lane_0.xml"), "<detector/>").unwrap();

        let network = network(40.);
        edge_scenario(network.edge("T").unwrap(), &profile(), 1.)
            .unwrap()
            .write(&files)
            .unwrap();

        assert_eq!(0, fs::read_dir(&files.detector_output).unwrap().count());
        assert!(fs::read_to_string(&files.config)
            .unwrap()
            .contains("<step-length value=\"1\"/>"));
    }
}
