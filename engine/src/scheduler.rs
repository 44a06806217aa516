//! Capacity scheduler (§4.H). Pure function over a slice of servers —
//! no store access here, so it is deterministic and unit-testable
//! (§8 property 5); the deployment request service is responsible for
//! loading the candidate set and re-running this under a transaction.

use crate::{
  entities::{ResourceRequest, Server, ServerStatus},
  error::{EngineError, SchedulerDiagnostics},
};

pub fn schedule(
  servers: &[Server],
  request: ResourceRequest,
  region: Option<&str>,
) -> Result<Server, EngineError> {
  let mut healthy: Vec<&Server> =
    servers.iter().filter(|s| s.status == ServerStatus::Healthy).collect();
  // (region asc, createdAt asc)
  healthy.sort_by(|a, b| a.region.cmp(&b.region).then(a.created_at.cmp(&b.created_at)));

  if healthy.is_empty() {
    return Err(EngineError::NoHealthyServers { diagnostics: SchedulerDiagnostics {
      requested: request,
      largest_available: ResourceRequest::default(),
      healthy_count: 0,
      preferred_region_healthy_count: 0,
    }});
  }

  let preferred_region_healthy_count = match region {
    Some(region) => healthy.iter().filter(|s| s.region == region).count(),
    None => healthy.len(),
  };

  if let Some(region) = region {
    let in_region: Vec<&Server> = healthy.iter().filter(|s| s.region == region).copied().collect();
    if let Some(best) = best_qualifying(&in_region, request) {
      return Ok(best.clone());
    }
  }

  if let Some(best) = best_qualifying(&healthy, request) {
    return Ok(best.clone());
  }

  let largest_available = largest_available(&healthy);
  Err(EngineError::InsufficientCapacity { diagnostics: SchedulerDiagnostics {
    requested: request,
    largest_available,
    healthy_count: healthy.len(),
    preferred_region_healthy_count,
  }})
}

fn best_qualifying<'a>(candidates: &[&'a Server], request: ResourceRequest) -> Option<&'a Server> {
  candidates
    .iter()
    .filter(|s| s.qualifies(request))
    .max_by(|a, b| {
      a.score()
        .partial_cmp(&b.score())
        .unwrap_or(std::cmp::Ordering::Equal)
        // Tie-break: earlier createdAt wins, so on equal score prefer
        // the server sorted earlier (reverse comparison on creation time).
        .then(b.created_at.cmp(&a.created_at))
    })
    .copied()
}

fn largest_available(candidates: &[&Server]) -> ResourceRequest {
  candidates
    .iter()
    .map(|s| s.available())
    .max_by_key(|a| a.ram_mb)
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn server(id: &str, region: &str, created_at: i64, total_ram: i64, reserved_ram: i64) -> Server {
    Server {
      id: id.into(),
      name: id.into(),
      region: region.into(),
      ipv4: "10.0.0.1".into(),
      status: ServerStatus::Healthy,
      total_ram_mb: total_ram,
      total_cpu_millicores: 4000,
      total_bandwidth_gb: 100,
      reserved_ram_mb: reserved_ram,
      reserved_cpu_millicores: 0,
      reserved_bandwidth_gb: 0,
      max_containers: 50,
      created_at,
    }
  }

  fn request() -> ResourceRequest {
    ResourceRequest { ram_mb: 256, cpu_millicores: 250, bandwidth_gb: 25 }
  }

  #[test]
  fn picks_highest_score_with_deterministic_tiebreak() {
    let servers = vec![
      server("a", "us", 1, 4096, 0),
      server("b", "us", 2, 4096, 0),
    ];
    // Equal score -> earlier createdAt wins.
    let picked = schedule(&servers, request(), None).unwrap();
    assert_eq!(picked.id, "a");
  }

  #[test]
  fn prefers_requested_region_when_it_qualifies() {
    let servers = vec![
      server("eu-1", "eu", 1, 4096, 0),
      server("us-1", "us", 1, 8192, 0),
    ];
    let picked = schedule(&servers, request(), Some("eu")).unwrap();
    assert_eq!(picked.id, "eu-1");
  }

  #[test]
  fn falls_back_to_other_regions_when_preferred_region_lacks_capacity() {
    let servers = vec![
      server("eu-1", "eu", 1, 512, 400),
      server("us-1", "us", 1, 4096, 0),
    ];
    let picked = schedule(&servers, request(), Some("eu")).unwrap();
    assert_eq!(picked.id, "us-1");
  }

  #[test]
  fn no_healthy_servers_is_distinct_from_insufficient_capacity() {
    let mut offline = server("x", "us", 1, 4096, 0);
    offline.status = ServerStatus::Offline;
    let err = schedule(&[offline], request(), None).unwrap_err();
    assert!(matches!(err, EngineError::NoHealthyServers { .. }));

    let tiny = server("y", "us", 1, 128, 0);
    let err = schedule(&[tiny], request(), None).unwrap_err();
    match err {
      EngineError::InsufficientCapacity { diagnostics } => {
        assert_eq!(diagnostics.largest_available.ram_mb, 128);
        assert_eq!(diagnostics.healthy_count, 1);
      }
      _ => panic!("expected InsufficientCapacity"),
    }
  }
}
