use tracing::{info, warn};

use crate::capacity::driver::{SimOverrides, SimulationBackend};
use crate::capacity::network::Junction;
use crate::capacity::scenario::demand::MixProfile;
use crate::capacity::scenario::extract::{junction_boundary, FilterRequest, NetworkFilter};
use crate::capacity::scenario::{
    junction_scenario, movement_pairs, Movement, ScenarioError, ScenarioFiles,
};
use crate::capacity::sweep::{
    log_progress, resolve_range, FlowResult, PointError, Sweep, SweepError, SweepPoint,
    SweepReport,
};

impl<F: NetworkFilter, B: SimulationBackend> Sweep<'_, F, B> {
    /// Measures every movement of each of `junctions` (indices into the network's junctions)
    /// assigned to this runner, once per profile.
    pub fn run_junctions(
        &self,
        junctions: &[usize],
        profiles: &[MixProfile],
    ) -> Result<SweepReport, SweepError> {
        let range = resolve_range(junctions.len(), self.settings);
        info!(
            "Processing junctions {} to {} of {}",
            range.start,
            range.end,
            junctions.len()
        );

        let mut report = SweepReport::default();
        let total = range.len();
        for (done, index) in junctions[range].iter().enumerate() {
            let junction = &self.network.junctions[*index];
            info!("Junction {} ({})", junction.id, junction.junction_type);

            match self.junction_rows(junction, profiles, &mut report) {
                Ok(rows) => report.finish_entity(&junction.id, &rows, &self.settings.output)?,
                Err(e) => report.skip_entity(&junction.id, &e),
            }
            log_progress(done + 1, total);
        }
        Ok(report)
    }

    fn junction_rows(
        &self,
        junction: &Junction,
        profiles: &[MixProfile],
        report: &mut SweepReport,
    ) -> Result<Vec<FlowResult>, PointError> {
        let files = self.work_files()?;
        let boundary = junction_boundary(self.network, junction)
            .ok_or_else(|| ScenarioError::EmptyGeometry(junction.id.clone()))?;
        self.filter.filter(&FilterRequest {
            source: self.network_path,
            boundary,
            keep_internal_links: true,
            output: &files.network,
        })?;

        let pairs = movement_pairs(self.network, junction);
        let mut rows = Vec::with_capacity(pairs.len() * profiles.len());
        for profile in profiles {
            let point = SweepPoint::Profile(profile.name.clone());
            for movement in &pairs {
                match self.movement_row(junction, *movement, profile, &point, &files) {
                    Ok(row) => rows.push(row),
                    Err(e) => {
                        warn!(
                            "Movement {} -> {} of junction {} with profile {} failed: {e}",
                            self.network.edges[movement.from].id,
                            self.network.edges[movement.to].id,
                            junction.id,
                            profile.name
                        );
                        report.failed_points += 1;
                    }
                }
            }
        }
        Ok(rows)
    }

    fn movement_row(
        &self,
        junction: &Junction,
        movement: Movement,
        profile: &MixProfile,
        point: &SweepPoint,
        files: &ScenarioFiles,
    ) -> Result<FlowResult, PointError> {
        let scenario = junction_scenario(
            self.network,
            junction,
            movement,
            profile,
            self.settings.step_length,
        )?;
        let throughput = self.simulate_point(&scenario, files, &SimOverrides::default())?;
        let from = &self.network.edges[movement.from];
        let to = &self.network.edges[movement.to];
        info!(
            "{} -> {}: {:.1} veh/h ({} vehicles)",
            from.id, to.id, throughput.flow, throughput.count
        );

        Ok(FlowResult {
            junction_id: Some(junction.id.clone()),
            edge_id: None,
            from_edge_id: Some(from.id.clone()),
            to_edge_id: Some(to.id.clone()),
            sweep_point: point.label(),
            flow: throughput.flow,
            count: throughput.count,
        })
    }
}
