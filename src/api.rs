//! Dangerous-goods mobile endpoints on top of the sync engine.
//!
//! Every helper goes through [`SyncEngine::request`], so reads are cached and
//! writes are queued while offline exactly like raw requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::engine::SyncEngine;
use crate::error::{StorageError, SyncResult};
use crate::response::SyncResponse;
use crate::transport::Method;

/// Shipment lifecycle states accepted by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
  Pending,
  Booked,
  AtOriginFacility,
  InTransit,
  AtDestinationFacility,
  OutForDelivery,
  Delivered,
  Cancelled,
  Exception,
}

/// GPS fix reported by a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
  pub latitude: f64,
  pub longitude: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub accuracy: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub heading: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub speed: Option<f64>,
  pub timestamp: DateTime<Utc>,
}

/// Signature and photos captured at handover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofOfDelivery {
  pub recipient_name: String,
  /// Base64 encoded signature image.
  pub signature_image: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub delivery_notes: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub delivery_photos: Vec<String>,
}

/// Typed client for the mobile API.
#[derive(Clone)]
pub struct MobileApi {
  engine: SyncEngine,
}

impl MobileApi {
  pub fn new(engine: SyncEngine) -> Self {
    Self { engine }
  }

  pub fn engine(&self) -> &SyncEngine {
    &self.engine
  }

  /// Shipments assigned to the current driver.
  pub async fn list_shipments(&self) -> SyncResult<SyncResponse> {
    self.engine.request(Method::Get, "/mobile/shipments/", None, true).await
  }

  pub async fn get_shipment(&self, id: &str) -> SyncResult<SyncResponse> {
    let path = format!("/mobile/shipments/{}/", id);
    self.engine.request(Method::Get, &path, None, true).await
  }

  /// Look up dangerous goods by UN number or name.
  pub async fn search_dangerous_goods(&self, query: &str) -> SyncResult<SyncResponse> {
    let params = json!({ "search": query });
    self
      .engine
      .request(Method::Get, "/mobile/dangerous-goods/", Some(params), true)
      .await
  }

  pub async fn update_status(&self, id: &str, status: ShipmentStatus) -> SyncResult<SyncResponse> {
    let path = format!("/shipments/{}/status", id);
    let body = json!({ "status": status });
    self.engine.request(Method::Patch, &path, Some(body), false).await
  }

  pub async fn update_location(&self, id: &str, location: &LocationUpdate) -> SyncResult<SyncResponse> {
    let path = format!("/mobile/shipments/{}/update_location/", id);
    self.engine.request(Method::Post, &path, Some(to_body(location)?), false).await
  }

  pub async fn proof_of_delivery(&self, id: &str, proof: &ProofOfDelivery) -> SyncResult<SyncResponse> {
    let path = format!("/mobile/shipments/{}/proof_of_delivery/", id);
    let mut body = to_body(proof)?;
    if let Value::Object(map) = &mut body {
      map.insert("shipment_id".into(), Value::String(id.to_string()));
    }
    self.engine.request(Method::Post, &path, Some(body), false).await
  }
}

fn to_body<T: Serialize>(value: &T) -> SyncResult<Value> {
  serde_json::to_value(value).map_err(|e| StorageError::from(e).into())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::EngineOptions;
  use crate::reachability::ManualReachability;
  use crate::store::MemoryStore;
  use crate::test_support::MockTransport;
  use chrono::TimeZone;
  use std::sync::Arc;

  fn api(online: bool) -> (MobileApi, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::ok());
    let engine = SyncEngine::new(
      Arc::new(MemoryStore::new()),
      transport.clone(),
      Arc::new(ManualReachability::new(online)),
      EngineOptions::default(),
    )
    .unwrap();
    (MobileApi::new(engine), transport)
  }

  #[test]
  fn test_status_wire_names() {
    assert_eq!(
      serde_json::to_value(ShipmentStatus::AtDestinationFacility).unwrap(),
      json!("AT_DESTINATION_FACILITY")
    );
    let status: ShipmentStatus = serde_json::from_value(json!("OUT_FOR_DELIVERY")).unwrap();
    assert_eq!(status, ShipmentStatus::OutForDelivery);
  }

  #[tokio::test]
  async fn test_update_status_request() {
    let (api, transport) = api(true);
    api.update_status("42", ShipmentStatus::Delivered).await.unwrap();

    let call = &transport.calls()[0];
    assert_eq!(call.method, Method::Patch);
    assert_eq!(call.path, "/shipments/42/status");
    assert_eq!(call.body, Some(json!({"status": "DELIVERED"})));
  }

  #[tokio::test]
  async fn test_search_passes_query_param() {
    let (api, transport) = api(true);
    api.search_dangerous_goods("UN1203").await.unwrap();
    api.search_dangerous_goods("UN1203").await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, "/mobile/dangerous-goods/");
    assert_eq!(calls[0].body, Some(json!({"search": "UN1203"})));
  }

  #[tokio::test]
  async fn test_offline_location_update_is_queued() {
    let (api, transport) = api(false);
    let fix = LocationUpdate {
      latitude: -33.86,
      longitude: 151.21,
      accuracy: Some(5.0),
      heading: None,
      speed: None,
      timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap(),
    };

    let response = api.update_location("42", &fix).await.unwrap();
    assert!(response.is_pending());
    assert_eq!(transport.call_count(), 0);

    let queued = &api.engine().pending_requests()[0];
    assert_eq!(queued.path, "/mobile/shipments/42/update_location/");
    let body = queued.body.as_ref().unwrap();
    assert_eq!(body["latitude"], json!(-33.86));
    assert!(body.get("heading").is_none());
  }

  #[tokio::test]
  async fn test_proof_of_delivery_carries_shipment_id() {
    let (api, transport) = api(true);
    let proof = ProofOfDelivery {
      recipient_name: "J. Citizen".into(),
      signature_image: "aGVsbG8=".into(),
      delivery_notes: Some("Left at dock 3".into()),
      delivery_photos: Vec::new(),
    };
    api.proof_of_delivery("42", &proof).await.unwrap();

    let call = &transport.calls()[0];
    assert_eq!(call.path, "/mobile/shipments/42/proof_of_delivery/");
    let body = call.body.as_ref().unwrap();
    assert_eq!(body["shipment_id"], json!("42"));
    assert_eq!(body["recipient_name"], json!("J. Citizen"));
    assert!(body.get("delivery_photos").is_none());
  }
}
