//! Local publishers, subscribers and signalling

use std::sync::Arc;

use super::Orchestrator;
use crate::control::{
    AddPublisher, AddSubscriber, RemovePublisher, RemoveSubscriber, SignalMessage, Signalling,
};
use crate::error::Result;
use crate::media::MediaSink;
use crate::session::{BridgeConn, Connection, ConnectionContext, MixerConn, SubscriptionSource};

/// Where a new subscriber's media comes from
enum Upstream {
    Publisher(Arc<Connection>),
    Mixer(Arc<MixerConn>),
    Bridge(Arc<BridgeConn>),
}

impl Upstream {
    fn source(&self) -> SubscriptionSource {
        match self {
            Upstream::Publisher(connection) => {
                SubscriptionSource::Publisher(connection.stream_id().to_string())
            }
            Upstream::Mixer(mixer) => SubscriptionSource::Mixer(mixer.id().to_string()),
            Upstream::Bridge(bridge) => SubscriptionSource::Bridge(bridge.id().to_string()),
        }
    }

    fn attach(&self, relying_id: &str, sink: Arc<dyn MediaSink>) -> bool {
        match self {
            Upstream::Publisher(connection) => connection.add_subscriber(relying_id, sink),
            Upstream::Mixer(mixer) => {
                mixer.add_subscriber(relying_id, sink);
                true
            }
            Upstream::Bridge(bridge) => bridge.add_subscriber(relying_id, sink),
        }
    }
}

impl Orchestrator {
    pub fn add_publisher(&self, payload: &AddPublisher) -> Result<()> {
        if self.clients.find_publisher(&payload.stream_id).is_some() {
            tracing::warn!(
                stream_id = %payload.stream_id,
                client_id = %payload.client_id,
                "Stream already published, ignoring"
            );
            return Ok(());
        }

        let context = ConnectionContext::publisher(&self.node, payload);
        let connection = Connection::open(
            context,
            None,
            self.collaborators.sessions.as_ref(),
            self.collaborators.bus.clone(),
            self.workers.lease(),
        )?;

        // a concurrent addPublisher may have taken the stream while opening
        if let Err(duplicate) =
            self.clients
                .insert_publisher(&payload.client_id, &payload.stream_id, connection)
        {
            tracing::warn!(
                stream_id = %payload.stream_id,
                client_id = %payload.client_id,
                "Stream published concurrently, closing duplicate"
            );
            duplicate.close();
            return Ok(());
        }

        tracing::info!(
            client_id = %payload.client_id,
            stream_id = %payload.stream_id,
            label = %payload.label,
            "Publisher added"
        );
        Ok(())
    }

    /// Remove a publisher, closing every subscriber connection and send
    /// bridge that relays it
    pub fn remove_publisher(&self, payload: &RemovePublisher) -> Result<()> {
        let removed = self
            .clients
            .with_client(&payload.client_id, |client| {
                client.publishers.remove(&payload.stream_id)
            })
            .flatten();

        match removed {
            Some(connection) => {
                let stream_id = payload.stream_id.as_str();
                let subscribers = self.clients.take_subscribers(|subscriber| {
                    matches!(
                        subscriber.subscription(),
                        Some(SubscriptionSource::Publisher(id)) if id == stream_id
                    )
                });
                let bridges = self
                    .bridges
                    .remove_where(|bridge| bridge.src_stream_id() == stream_id);

                tracing::info!(
                    client_id = %payload.client_id,
                    stream_id = %stream_id,
                    subscribers = subscribers.len(),
                    bridges = bridges.len(),
                    "Publisher removed"
                );

                for subscriber in subscribers {
                    subscriber.close();
                }
                self.retire_bridges(bridges);
                connection.close();
                self.clients.remove_empty();
            }
            None => {
                tracing::warn!(
                    client_id = %payload.client_id,
                    stream_id = %payload.stream_id,
                    "Unknown publisher"
                );
            }
        }

        self.check_exit();
        Ok(())
    }

    /// Subscribe a client to a local publisher, a mixer output or a
    /// receive bridge, in that order of preference
    pub fn add_subscriber(&self, payload: &AddSubscriber) -> Result<()> {
        let Some(upstream) = self.resolve_upstream(payload) else {
            tracing::warn!(
                client_id = %payload.client_id,
                subscribe_to = %payload.subscribe_to,
                bridge_id = %payload.bridge_id,
                "Nothing to subscribe to"
            );
            return Ok(());
        };

        let context = ConnectionContext::subscriber(&self.node, payload);
        let connection = Connection::open(
            context,
            Some(upstream.source()),
            self.collaborators.sessions.as_ref(),
            self.collaborators.bus.clone(),
            self.workers.lease(),
        )?;

        let attached = connection
            .sink()
            .is_some_and(|sink| upstream.attach(&payload.client_id, sink));
        if !attached {
            tracing::warn!(
                client_id = %payload.client_id,
                subscribe_to = %payload.subscribe_to,
                "Upstream has no fan-out, dropping subscriber"
            );
            connection.close();
            return Ok(());
        }

        let replaced = self.clients.with_client_or_create(&payload.client_id, |client| {
            client
                .subscribers
                .insert(payload.subscribe_to.clone(), connection.clone())
        });
        if let Some(previous) = replaced {
            previous.close();
        }

        tracing::info!(
            client_id = %payload.client_id,
            subscribe_to = %payload.subscribe_to,
            source = ?connection.subscription(),
            "Subscriber added"
        );
        Ok(())
    }

    fn resolve_upstream(&self, payload: &AddSubscriber) -> Option<Upstream> {
        if let Some(publisher) = self.clients.find_publisher(&payload.subscribe_to) {
            return Some(Upstream::Publisher(publisher));
        }
        if let Some(mixer) = self.clients.find_mixer(&payload.subscribe_to) {
            // A mixer relayed in from another node arrives on a bridge
            // keyed by the mixer id
            return Some(match self.bridges.get(&payload.subscribe_to) {
                Some(bridge) => Upstream::Bridge(bridge),
                None => Upstream::Mixer(mixer),
            });
        }
        self.bridges.get(&payload.bridge_id).map(Upstream::Bridge)
    }

    pub fn remove_subscriber(&self, payload: &RemoveSubscriber) -> Result<()> {
        let removed = self
            .clients
            .with_client(&payload.client_id, |client| {
                client.subscribers.remove(&payload.subscribe_to)
            })
            .flatten();

        match removed {
            Some(connection) => {
                self.detach_subscriber(&connection);
                connection.close();
                self.clients.remove_if_empty(&payload.client_id);
                tracing::info!(
                    client_id = %payload.client_id,
                    subscribe_to = %payload.subscribe_to,
                    "Subscriber removed"
                );
            }
            None => {
                tracing::warn!(
                    client_id = %payload.client_id,
                    subscribe_to = %payload.subscribe_to,
                    "Unknown subscriber"
                );
            }
        }

        self.check_exit();
        Ok(())
    }

    fn detach_subscriber(&self, connection: &Connection) {
        let client_id = connection.client_id();
        match connection.subscription() {
            Some(SubscriptionSource::Publisher(stream_id)) => {
                if let Some(publisher) = self.clients.find_publisher(stream_id) {
                    publisher.remove_subscriber(client_id);
                }
            }
            Some(SubscriptionSource::Mixer(mixer_id)) => {
                if let Some(mixer) = self.clients.find_mixer(mixer_id) {
                    mixer.remove_subscriber(client_id);
                }
            }
            Some(SubscriptionSource::Bridge(bridge_id)) => {
                if let Some(bridge) = self.bridges.get(bridge_id) {
                    bridge.remove_subscriber(client_id);
                    self.release_bridge(bridge_id);
                }
            }
            None => {}
        }
    }

    /// Route an SDP offer or ICE candidate to a client's connection
    pub fn process_signalling(&self, payload: &Signalling) -> Result<()> {
        let connection = self
            .clients
            .with_client(&payload.client_id, |client| {
                client
                    .publishers
                    .get(&payload.stream_id)
                    .or_else(|| client.subscribers.get(&payload.stream_id))
                    .cloned()
            })
            .flatten();

        let Some(connection) = connection else {
            tracing::warn!(
                client_id = %payload.client_id,
                stream_id = %payload.stream_id,
                "Signalling for unknown connection"
            );
            return Ok(());
        };

        match &payload.msg {
            SignalMessage::Offer { sdp } => connection.set_remote_sdp(sdp),
            SignalMessage::Candidate { candidate } => connection.add_remote_candidate(
                &candidate.sdp_mid,
                candidate.sdp_mline_index,
                &candidate.candidate,
            ),
        }
    }
}
