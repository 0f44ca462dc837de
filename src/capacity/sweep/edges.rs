use tracing::{info, warn};

use crate::capacity::driver::{SimOverrides, SimulationBackend};
use crate::capacity::network::Edge;
use crate::capacity::scenario::demand::MixProfile;
use crate::capacity::scenario::extract::{edge_boundary, FilterRequest, NetworkFilter};
use crate::capacity::scenario::{edge_demand, edge_scenario, ScenarioError};
use crate::capacity::sweep::{
    log_progress, resolve_range, scale_points, FlowResult, PointError, Sweep, SweepError,
    SweepPoint, SweepReport,
};

impl<F: NetworkFilter, B: SimulationBackend> Sweep<'_, F, B> {
    /// Sweeps the demand scale for each of `edges` (indices into the network's edges) assigned
    /// to this runner.
    pub fn run_edges(
        &self,
        edges: &[usize],
        profile: &MixProfile,
    ) -> Result<SweepReport, SweepError> {
        let range = resolve_range(edges.len(), self.settings);
        info!("Processing edges {} to {} of {}", range.start, range.end, edges.len());

        let mut report = SweepReport::default();
        let total = range.len();
        for (done, index) in edges[range].iter().enumerate() {
            let edge = &self.network.edges[*index];
            info!(
                "Edge {}: {} lanes, speed {:.2}, capacity estimate {:.1} veh/h",
                edge.id,
                edge.lane_count(),
                edge.speed(),
                edge_demand(edge)
            );

            match self.edge_rows(edge, profile, &mut report) {
                Ok(rows) => report.finish_entity(&edge.id, &rows, &self.settings.output)?,
                Err(e) => report.skip_entity(&edge.id, &e),
            }
            log_progress(done + 1, total);
        }
        Ok(report)
    }

    fn edge_rows(
        &self,
        edge: &Edge,
        profile: &MixProfile,
        report: &mut SweepReport,
    ) -> Result<Vec<FlowResult>, PointError> {
        let files = self.work_files()?;
        let boundary =
            edge_boundary(edge).ok_or_else(|| ScenarioError::EmptyGeometry(edge.id.clone()))?;
        self.filter.filter(&FilterRequest {
            source: self.network_path,
            boundary,
            keep_internal_links: false,
            output: &files.network,
        })?;
        let scenario = edge_scenario(edge, profile, self.settings.step_length)?;

        let mut rows = Vec::new();
        for scale in scale_points() {
            let point = SweepPoint::Scale(scale);
            let overrides = SimOverrides { scale: Some(scale) };
            match self.simulate_point(&scenario, &files, &overrides) {
                Ok(throughput) => rows.push(FlowResult {
                    junction_id: None,
                    edge_id: Some(edge.id.clone()),
                    from_edge_id: None,
                    to_edge_id: None,
                    sweep_point: point.label(),
                    flow: throughput.flow,
                    count: throughput.count,
                }),
                Err(e) => {
                    warn!("Scale {} of edge {} failed: {e}", point.label(), edge.id);
                    report.failed_points += 1;
                }
            }
        }
        Ok(rows)
    }
}
