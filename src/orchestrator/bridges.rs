//! Virtual publishers and subscribers, and recorders on bridge fan-outs
//!
//! A virtual publisher is remote media arriving over the bridge: it gets
//! a receive-mode [`BridgeConn`] whose fan-out local subscribers, mixers
//! and recorders attach to. A virtual subscriber relays a local publisher
//! or mixer output to another node through a send-mode bridge.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::Orchestrator;
use crate::bridge::BridgeMode;
use crate::control::{
    AddRecorder, AddVirtualPublisher, AddVirtualSubscriber, RemoveRecorder,
    RemoveVirtualPublisher, RemoveVirtualSubscriber,
};
use crate::error::Result;
use crate::external::{record_file, RecorderParams};
use crate::session::BridgeConn;

fn recorder_client_id(client_id: &str) -> String {
    format!("recorder_{}", client_id)
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

impl Orchestrator {
    /// Open a receive bridge for remote media; no-op if the id is taken
    pub fn add_virtual_publisher(&self, payload: &AddVirtualPublisher) -> Result<()> {
        let options = self
            .bridge_options(
                &payload.id,
                &payload.sender_ip,
                payload.sender_port,
                BridgeMode::Receive,
            )?
            .ssrcs(payload.audio_ssrc, payload.video_ssrc);

        let (bridge, created) = self
            .bridges
            .get_or_open(&payload.id, || self.open_bridge(options, &payload.src_stream_id))?;
        bridge.pin();

        if created {
            tracing::info!(
                bridge_id = %bridge.id(),
                src_stream_id = %payload.src_stream_id,
                sender = %bridge.stream().remote(),
                "Virtual publisher added"
            );
        } else {
            tracing::debug!(bridge_id = %payload.id, "Virtual publisher already present");
        }
        Ok(())
    }

    /// Close a receive bridge and every local subscriber fed by it
    pub fn remove_virtual_publisher(&self, payload: &RemoveVirtualPublisher) -> Result<()> {
        let Some(bridge) = self.bridges.remove(&payload.id) else {
            tracing::warn!(bridge_id = %payload.id, "Unknown virtual publisher");
            return Ok(());
        };

        let closed = self.retire_bridges(vec![bridge]);
        tracing::info!(
            bridge_id = %payload.id,
            subscribers = closed,
            "Virtual publisher removed"
        );
        if closed > 0 {
            self.check_exit();
        }
        Ok(())
    }

    /// Relay a local publisher, or failing that a mixer output, to a
    /// remote node
    pub fn add_virtual_subscriber(&self, payload: &AddVirtualSubscriber) -> Result<()> {
        if self.bridges.contains(&payload.id) {
            tracing::debug!(bridge_id = %payload.id, "Virtual subscriber already present");
            return Ok(());
        }

        let publisher = self.clients.find_publisher(&payload.src_stream_id);
        let mixer = match publisher {
            Some(_) => None,
            None => self.clients.find_mixer(&payload.src_stream_id),
        };
        if publisher.is_none() && mixer.is_none() {
            tracing::warn!(
                bridge_id = %payload.id,
                src_stream_id = %payload.src_stream_id,
                "No publisher or mixer for virtual subscriber"
            );
            return Ok(());
        }

        let options = self.bridge_options(
            &payload.id,
            &payload.recver_ip,
            payload.recver_port,
            BridgeMode::Send,
        )?;
        let (bridge, created) = self
            .bridges
            .get_or_open(&payload.id, || self.open_bridge(options, &payload.src_stream_id))?;
        if !created {
            return Ok(());
        }

        if let Some(publisher) = publisher {
            publisher.add_subscriber(&payload.id, bridge.sink());
        } else if let Some(mixer) = mixer {
            mixer.add_subscriber(&payload.id, bridge.sink());
        }

        tracing::info!(
            bridge_id = %payload.id,
            src_stream_id = %payload.src_stream_id,
            receiver = %bridge.stream().remote(),
            "Virtual subscriber added"
        );
        Ok(())
    }

    pub fn remove_virtual_subscriber(&self, payload: &RemoveVirtualSubscriber) -> Result<()> {
        if let Some(publisher) = self.clients.find_publisher(&payload.src_stream_id) {
            publisher.remove_subscriber(&payload.id);
        } else if let Some(mixer) = self.clients.find_mixer(&payload.src_stream_id) {
            mixer.remove_subscriber(&payload.id);
        }

        match self.bridges.remove(&payload.id) {
            Some(bridge) => {
                bridge.close();
                tracing::info!(bridge_id = %payload.id, "Virtual subscriber removed");
            }
            None => {
                tracing::warn!(bridge_id = %payload.id, "Unknown virtual subscriber");
            }
        }
        Ok(())
    }

    /// Record the media arriving on a receive bridge
    ///
    /// One output file is opened per requested record type.
    pub fn add_recorder(&self, payload: &AddRecorder) -> Result<()> {
        let Some(bridge) = self.receive_bridge(&payload.bridge_id) else {
            tracing::warn!(
                bridge_id = %payload.bridge_id,
                stream_id = %payload.stream_id,
                "No receive bridge to record from"
            );
            return Ok(());
        };

        let millis = unix_millis();
        let params = RecorderParams {
            client_id: recorder_client_id(&payload.client_id),
            stream_id: payload.stream_id.clone(),
            files: payload
                .record_types
                .iter()
                .map(|kind| record_file(&self.record_path, &payload.stream_id, millis, kind))
                .collect(),
        };

        let recorder = self.collaborators.recorders.create(&params)?;
        if let Err(e) = recorder.init() {
            recorder.close();
            return Err(e);
        }

        bridge.add_sink(payload.stream_id.clone(), recorder.clone().as_sink());
        let replaced = self.clients.with_client_or_create(&params.client_id, |client| {
            client
                .recorders
                .insert(payload.stream_id.clone(), recorder)
        });
        if let Some(previous) = replaced {
            previous.close();
        }

        tracing::info!(
            client_id = %params.client_id,
            stream_id = %payload.stream_id,
            bridge_id = %payload.bridge_id,
            files = params.files.len(),
            "Recorder added"
        );
        Ok(())
    }

    pub fn remove_recorder(&self, payload: &RemoveRecorder) -> Result<()> {
        let client_id = recorder_client_id(&payload.client_id);
        if let Some(bridge) = self.bridges.get(&payload.bridge_id) {
            bridge.remove_sink(&payload.stream_id);
            self.release_bridge(&payload.bridge_id);
        }

        let removed = self
            .clients
            .with_client(&client_id, |client| client.recorders.remove(&payload.stream_id))
            .flatten();

        match removed {
            Some(recorder) => {
                recorder.close();
                self.clients.remove_if_empty(&client_id);
                tracing::info!(
                    client_id = %client_id,
                    stream_id = %payload.stream_id,
                    "Recorder removed"
                );
            }
            None => {
                tracing::warn!(
                    client_id = %client_id,
                    stream_id = %payload.stream_id,
                    "Unknown recorder"
                );
            }
        }

        self.check_exit();
        Ok(())
    }

    fn receive_bridge(&self, bridge_id: &str) -> Option<Arc<BridgeConn>> {
        self.bridges
            .get(bridge_id)
            .filter(|bridge| bridge.mode() == BridgeMode::Receive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{add_bridge_header, StreamId, MTU_SIZE};
    use crate::media::rtp::test_packets::rtp;
    use crate::media::DataPacket;
    use crate::test_support::Harness;
    use bytes::BytesMut;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;

    fn recorder(client: &str, stream: &str, bridge: &str) -> serde_json::Value {
        json!({
            "appid": 1, "room_id": "r1", "client_id": client, "stream_id": stream,
            "record_types": ["flv", "mp4"], "reply_to": "q1", "bridge_id": bridge
        })
    }

    fn remove_recorder(client: &str, stream: &str, bridge: &str) -> serde_json::Value {
        json!({
            "appid": 1, "room_id": "r1", "client_id": client, "stream_id": stream,
            "bridge_id": bridge
        })
    }

    #[test]
    fn test_recorder_client_id() {
        assert_eq!(recorder_client_id("c1"), "recorder_c1");
    }

    #[tokio::test]
    async fn test_virtual_publisher_is_idempotent() {
        let h = Harness::start().await;
        h.send("addVirtualPublisher", h.virtual_publisher("b1", "s1"));
        let first = h.orchestrator.bridges().get("b1").unwrap();
        h.send("addVirtualPublisher", h.virtual_publisher("b1", "s1"));
        let second = h.orchestrator.bridges().get("b1").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.mode(), BridgeMode::Receive);
        assert_eq!(h.io.stream_count(), 1);
        h.close().await;
    }

    #[tokio::test]
    async fn test_virtual_publisher_with_bad_address_opens_nothing() {
        let h = Harness::start().await;
        let mut payload = h.virtual_publisher("b1", "s1");
        payload["senderIp"] = json!("not-an-ip");
        h.send("addVirtualPublisher", payload);

        assert!(h.orchestrator.bridges().is_empty());
        assert_eq!(h.io.stream_count(), 0);
        h.close().await;
    }

    #[tokio::test]
    async fn test_remove_virtual_publisher_closes_bridge_subscribers() {
        let h = Harness::start().await;
        h.send("addVirtualPublisher", h.virtual_publisher("b1", "s9"));
        h.send("addSubscriber", h.subscriber("c2", "s9", "b1"));

        h.send(
            "removeVirtualPublisher",
            json!({"appid": 1, "roomId": "r1", "srcStreamId": "s9", "id": "b1"}),
        );

        assert!(h.orchestrator.bridges().is_empty());
        assert!(h.orchestrator.clients().is_empty());
        assert!(h.sessions.session("c2", "s9").unwrap().is_closed());
        assert!(h.orchestrator.exit_requested());
        h.close().await;
    }

    #[tokio::test]
    async fn test_inbound_bridge_media_reaches_local_subscriber() {
        let h = Harness::start().await;
        let mut payload = h.virtual_publisher("b1", "s9");
        payload["videoSSRC"] = json!(0xB0B0);
        h.send("addVirtualPublisher", payload);
        h.send("addSubscriber", h.subscriber("c2", "s9", "b1"));

        let mut datagram = BytesMut::new();
        let framed = add_bridge_header(
            &mut datagram,
            &StreamId::new("b1").unwrap(),
            &rtp(96, 1, 0xB0B0, 20),
            MTU_SIZE,
        )
        .unwrap();
        h.io.on_recv(framed);

        let session = h.sessions.session("c2", "s9").unwrap();
        let delivered = async {
            while session.received() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(1), delivered)
            .await
            .unwrap();
        h.close().await;
    }

    #[tokio::test]
    async fn test_virtual_subscriber_relays_publisher() {
        let h = Harness::start().await;
        h.send("addPublisher", h.publisher("c1", "s1"));
        h.send("addVirtualSubscriber", h.virtual_subscriber("b2", "s1"));

        let publisher = h.orchestrator.clients().find_publisher("s1").unwrap();
        assert_eq!(publisher.subscriber_ids(), vec!["b2_s1".to_string()]);
        let bridge = h.orchestrator.bridges().get("b2").unwrap();
        assert_eq!(bridge.mode(), BridgeMode::Send);

        h.sessions
            .session("c1", "s1")
            .unwrap()
            .produce_video(DataPacket::video(rtp(96, 7, 0xB0B0, 20)));
        assert_eq!(bridge.stats().datagrams_sent, 1);

        h.send(
            "removeVirtualSubscriber",
            json!({"appid": 1, "roomId": "r1", "srcStreamId": "s1", "id": "b2"}),
        );
        assert!(publisher.subscriber_ids().is_empty());
        assert!(h.orchestrator.bridges().is_empty());
        assert!(bridge.is_closed());
        h.close().await;
    }

    #[tokio::test]
    async fn test_virtual_subscriber_without_source_is_ignored() {
        let h = Harness::start().await;
        h.send("addVirtualSubscriber", h.virtual_subscriber("b2", "s1"));

        assert!(h.orchestrator.bridges().is_empty());
        h.close().await;
    }

    #[tokio::test]
    async fn test_remove_publisher_closes_send_bridges() {
        let h = Harness::start().await;
        h.send("addPublisher", h.publisher("c1", "s1"));
        h.send("addVirtualSubscriber", h.virtual_subscriber("b2", "s1"));
        let bridge = h.orchestrator.bridges().get("b2").unwrap();

        h.send(
            "removePublisher",
            json!({"appid": 1, "room_id": "r1", "client_id": "c1", "stream_id": "s1"}),
        );

        assert!(h.orchestrator.bridges().is_empty());
        assert!(bridge.is_closed());
        h.close().await;
    }

    #[tokio::test]
    async fn test_recorder_lifecycle() {
        let h = Harness::start().await;
        h.send("addVirtualPublisher", h.virtual_publisher("b1", "s1"));
        h.send("addRecorder", recorder("c1", "s1", "b1"));

        assert!(h.orchestrator.clients().contains("recorder_c1"));
        let recorder = h.recorders.recorder("s1").unwrap();
        assert!(recorder.is_inited());
        assert_eq!(recorder.params().client_id, "recorder_c1");

        let files = &recorder.params().files;
        assert_eq!(files.len(), 2);
        assert!(files[0].starts_with(PathBuf::from("/tmp/relay-record")));
        let name = files[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("s1_") && name.ends_with(".flv"));
        assert!(files[1].to_string_lossy().ends_with(".mp4"));

        let bridge = h.orchestrator.bridges().get("b1").unwrap();
        assert!(bridge.has_sink("s1"));

        h.send("removeRecorder", remove_recorder("c1", "s1", "b1"));
        assert!(recorder.is_closed());
        assert!(!bridge.has_sink("s1"));
        // the virtual publisher still holds its bridge
        assert!(h.orchestrator.bridges().contains("b1"));
        assert!(!bridge.is_closed());
        assert!(h.orchestrator.clients().is_empty());
        h.close().await;
    }

    #[tokio::test]
    async fn test_recorder_needs_receive_bridge() {
        let h = Harness::start().await;
        h.send("addRecorder", recorder("c1", "s1", "missing"));

        h.send("addPublisher", h.publisher("c1", "s1"));
        h.send("addVirtualSubscriber", h.virtual_subscriber("b2", "s1"));
        h.send("addRecorder", recorder("c1", "s1", "b2"));

        assert!(h.recorders.recorder("s1").is_none());
        assert!(!h.orchestrator.clients().contains("recorder_c1"));
        h.close().await;
    }
}
