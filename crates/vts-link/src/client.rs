//! The avatar host client: connection lifecycle, authentication, and action
//! triggers.
//!
//! One client owns one WebSocket connection. Outbound frames go through a
//! writer task; a listener task is the sole writer of the `connected` flag
//! and completes pending requests by correlation id. Requests that expect a
//! reply (`call`) park a oneshot sender in the pending table; action triggers
//! (`fire`) are send-only.

use crate::{
    error::VtsError,
    protocol::{
        ApiErrorData, ApiStateData, AuthenticationRequestData, AuthenticationResponseData,
        AuthenticationTokenResponseData, ExpressionActivationData, HotkeyTriggerData,
        InjectParameterData, ParameterValue, PluginInfo, RequestEnvelope, RequestType,
        ResponseEnvelope,
    },
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, protocol::Message},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Hotkey and expression identifiers composed into speaking/idle cues.
#[derive(Debug, Clone)]
pub struct SpeakingCues {
    pub speaking_hotkey: String,
    pub idle_hotkey: String,
    pub speaking_expression: String,
}

impl Default for SpeakingCues {
    fn default() -> Self {
        Self {
            speaking_hotkey: "StartSpeaking".into(),
            idle_hotkey: "StopSpeaking".into(),
            speaking_expression: "Speaking.exp3.json".into(),
        }
    }
}

struct Inner {
    plugin: PluginInfo,
    cues: SpeakingCues,
    outbound: mpsc::Sender<Message>,
    pending: Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>,
    connected: AtomicBool,
    authenticated: AtomicBool,
    token: Mutex<Option<String>>,
}

/// Client for the avatar host connection. Cheap to clone; clones share the
/// same connection and state.
#[derive(Clone)]
pub struct VtsClient {
    inner: Arc<Inner>,
}

impl VtsClient {
    /// Opens a WebSocket to `ws://{host}:{port}` and starts the listener.
    ///
    /// A connect failure is returned as-is; no retry or backoff is attempted.
    /// `token` optionally seeds a previously issued credential so
    /// authentication can complete without operator approval.
    pub async fn connect(
        host: &str,
        port: u16,
        plugin: PluginInfo,
        cues: SpeakingCues,
        token: Option<String>,
    ) -> Result<Self, VtsError> {
        let url = format!("ws://{host}:{port}");
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        info!(%url, "connected to avatar host");
        let (sink, stream) = ws_stream.split();
        Ok(Self::from_transport(sink, stream, plugin, cues, token))
    }

    /// Wires a client over an arbitrary sink/stream pair.
    ///
    /// This is the transport seam: tests drive the client through in-memory
    /// channels instead of a socket.
    pub fn from_transport<Tx, Rx>(
        mut sink: Tx,
        mut stream: Rx,
        plugin: PluginInfo,
        cues: SpeakingCues,
        token: Option<String>,
    ) -> Self
    where
        Tx: Sink<Message, Error = WsError> + Send + Unpin + 'static,
        Rx: Stream<Item = Result<Message, WsError>> + Send + Unpin + 'static,
    {
        let (outbound, mut outbound_rx) = mpsc::channel::<Message>(32);
        let inner = Arc::new(Inner {
            plugin,
            cues,
            outbound,
            pending: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            authenticated: AtomicBool::new(false),
            token: Mutex::new(token),
        });

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(err) = sink.send(message).await {
                    warn!(%err, "failed to write frame to avatar host");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let listener = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => handle_frame(&listener, &text),
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "avatar host closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "error reading from avatar host");
                        break;
                    }
                }
            }
            listener.connected.store(false, Ordering::Release);
            listener.pending.lock().unwrap().clear();
            debug!("avatar host listener stopped");
        });

        Self { inner }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.authenticated.load(Ordering::Acquire)
    }

    /// The credential issued by the avatar host, if one is held.
    pub fn session_token(&self) -> Option<String> {
        self.inner.token.lock().unwrap().clone()
    }

    /// Authenticates the plugin with the avatar host.
    ///
    /// If the running session is already authenticated, only the state query
    /// is issued. Otherwise a token is requested when none is held (the host
    /// pops an approval dialog at this point), then exchanged for an
    /// authenticated session. A rejection leaves the client permanently
    /// unauthenticated for this process; the caller decides whether that is
    /// fatal.
    pub async fn authenticate(&self) -> Result<(), VtsError> {
        let state = self.api_state().await?;
        if state.current_session_authenticated {
            self.inner.authenticated.store(true, Ordering::Release);
            info!("avatar host session was already authenticated");
            return Ok(());
        }

        let token = match self.session_token() {
            Some(token) => token,
            None => {
                let token = self.request_token().await?;
                self.inner.token.lock().unwrap().replace(token.clone());
                info!("avatar host issued a new authentication token");
                token
            }
        };

        let data = serde_json::to_value(AuthenticationRequestData {
            plugin_name: self.inner.plugin.plugin_name.clone(),
            plugin_developer: self.inner.plugin.plugin_developer.clone(),
            authentication_token: token,
        })?;
        let response = self.call(RequestType::AuthenticationRequest, data).await?;
        let auth: AuthenticationResponseData = serde_json::from_value(response.data)?;
        if !auth.authenticated {
            warn!(reason = %auth.reason, "avatar host rejected authentication");
            return Err(VtsError::AuthenticationRejected(auth.reason));
        }

        self.inner.authenticated.store(true, Ordering::Release);
        info!("authenticated with avatar host");
        Ok(())
    }

    /// Queries the avatar host's session state.
    pub async fn api_state(&self) -> Result<ApiStateData, VtsError> {
        let response = self
            .call(RequestType::ApiStateRequest, serde_json::Value::Null)
            .await?;
        Ok(serde_json::from_value(response.data)?)
    }

    /// Fires a named hotkey. Send-only; no response is awaited.
    pub async fn trigger_hotkey(&self, hotkey_id: &str) -> Result<(), VtsError> {
        self.ensure_ready()?;
        let data = serde_json::to_value(HotkeyTriggerData {
            hotkey_id: hotkey_id.into(),
        })?;
        self.fire(RequestType::HotkeyTriggerRequest, data).await
    }

    /// Activates or deactivates an expression preset. Send-only.
    pub async fn trigger_expression(&self, expression_file: &str, active: bool) -> Result<(), VtsError> {
        self.ensure_ready()?;
        let data = serde_json::to_value(ExpressionActivationData {
            expression_file: expression_file.into(),
            active,
        })?;
        self.fire(RequestType::ExpressionActivationRequest, data)
            .await
    }

    /// Injects tracking parameter values into the hosted model. Send-only.
    pub async fn inject_parameters(&self, values: Vec<ParameterValue>) -> Result<(), VtsError> {
        self.ensure_ready()?;
        let data = serde_json::to_value(InjectParameterData {
            face_found: false,
            mode: "set",
            parameter_values: values,
        })?;
        self.fire(RequestType::InjectParameterDataRequest, data)
            .await
    }

    /// Puts the avatar into its speaking pose: the speaking hotkey, then the
    /// speaking expression. Not atomic; a failed hotkey send propagates and
    /// the expression is not attempted.
    pub async fn start_speaking(&self) -> Result<(), VtsError> {
        let cues = self.inner.cues.clone();
        self.trigger_hotkey(&cues.speaking_hotkey).await?;
        self.trigger_expression(&cues.speaking_expression, true).await
    }

    /// Returns the avatar to its idle pose: the idle hotkey, then the
    /// speaking expression deactivated.
    pub async fn stop_speaking(&self) -> Result<(), VtsError> {
        let cues = self.inner.cues.clone();
        self.trigger_hotkey(&cues.idle_hotkey).await?;
        self.trigger_expression(&cues.speaking_expression, false)
            .await
    }

    /// Closes the connection. Idempotent; calling on a closed client is a
    /// no-op.
    pub async fn disconnect(&self) {
        if self.inner.connected.swap(false, Ordering::AcqRel) {
            let _ = self.inner.outbound.send(Message::Close(None)).await;
            info!("disconnected from avatar host");
        }
    }

    async fn request_token(&self) -> Result<String, VtsError> {
        let data = serde_json::to_value(&self.inner.plugin)?;
        let response = self
            .call(RequestType::AuthenticationTokenRequest, data)
            .await?;
        let token: AuthenticationTokenResponseData = serde_json::from_value(response.data)?;
        Ok(token.authentication_token)
    }

    fn ensure_ready(&self) -> Result<(), VtsError> {
        if !self.is_connected() {
            return Err(VtsError::NotConnected);
        }
        if !self.is_authenticated() {
            debug!("dropping avatar trigger issued before authentication");
            return Err(VtsError::NotAuthenticated);
        }
        Ok(())
    }

    /// Sends a request and waits for the response carrying the same
    /// correlation id.
    async fn call(
        &self,
        message_type: RequestType,
        data: serde_json::Value,
    ) -> Result<ResponseEnvelope, VtsError> {
        if !self.is_connected() {
            return Err(VtsError::NotConnected);
        }

        let request_id = Uuid::new_v4().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .unwrap()
            .insert(request_id.clone(), reply_tx);

        let frame = RequestEnvelope::new(request_id.clone(), message_type, data).to_frame()?;
        if self
            .inner
            .outbound
            .send(Message::Text(frame.into()))
            .await
            .is_err()
        {
            self.inner.pending.lock().unwrap().remove(&request_id);
            return Err(VtsError::ConnectionClosed);
        }

        let response = reply_rx.await.map_err(|_| VtsError::ConnectionClosed)?;
        if response.message_type == "APIError" {
            let err: ApiErrorData = serde_json::from_value(response.data)?;
            return Err(VtsError::Api {
                error_id: err.error_id,
                message: err.message,
            });
        }
        Ok(response)
    }

    /// Sends a request without awaiting a response.
    async fn fire(
        &self,
        message_type: RequestType,
        data: serde_json::Value,
    ) -> Result<(), VtsError> {
        let frame =
            RequestEnvelope::new(Uuid::new_v4().to_string(), message_type, data).to_frame()?;
        self.inner
            .outbound
            .send(Message::Text(frame.into()))
            .await
            .map_err(|_| VtsError::ConnectionClosed)
    }
}

fn handle_frame(inner: &Arc<Inner>, text: &str) {
    let envelope = match serde_json::from_str::<ResponseEnvelope>(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(%err, "discarding malformed frame from avatar host");
            return;
        }
    };

    if !envelope.request_id.is_empty() {
        let waiter = inner.pending.lock().unwrap().remove(&envelope.request_id);
        if let Some(waiter) = waiter {
            let _ = waiter.send(envelope);
            return;
        }
    }

    match envelope.message_type.as_str() {
        "APIStateResponse" => debug!(data = %envelope.data, "avatar host state notice"),
        "APIError" => warn!(data = %envelope.data, "unsolicited avatar host error"),
        other => debug!(message_type = other, "ignoring unrecognized message type"),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
    use serde_json::{Value, json};
    use std::time::Duration;

    type Inbound = UnboundedSender<Result<Message, WsError>>;

    fn test_link(token: Option<&str>) -> (VtsClient, UnboundedReceiver<Message>, Inbound) {
        let (out_tx, out_rx) = unbounded::<Message>();
        let (in_tx, in_rx) = unbounded::<Result<Message, WsError>>();
        let sink = out_tx.sink_map_err(|_| WsError::ConnectionClosed);
        let client = VtsClient::from_transport(
            sink,
            in_rx,
            PluginInfo {
                plugin_name: "AI Chat Assistant".into(),
                plugin_developer: "AI Assistant".into(),
            },
            SpeakingCues::default(),
            token.map(str::to_owned),
        );
        (client, out_rx, in_tx)
    }

    async fn next_request(sent: &mut UnboundedReceiver<Message>) -> Value {
        match sent.next().await.expect("expected an outbound frame") {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    fn reply(inbound: &Inbound, request: &Value, message_type: &str, data: Value) {
        let frame = json!({
            "apiName": "VTubeStudioPublicAPI",
            "apiVersion": "1.0",
            "requestID": request["requestID"],
            "messageType": message_type,
            "data": data,
        });
        inbound
            .unbounded_send(Ok(Message::Text(frame.to_string().into())))
            .unwrap();
    }

    fn assert_no_frames(sent: &mut UnboundedReceiver<Message>) {
        assert!(
            sent.try_next().is_err(),
            "expected no outbound frames on the transport"
        );
    }

    /// Scripted host side of a full first-time authentication.
    async fn serve_first_auth(sent: &mut UnboundedReceiver<Message>, inbound: &Inbound) {
        let state_req = next_request(sent).await;
        assert_eq!(state_req["messageType"], "APIStateRequest");
        reply(
            inbound,
            &state_req,
            "APIStateResponse",
            json!({"active": true, "vTubeStudioVersion": "1.28.0", "currentSessionAuthenticated": false}),
        );

        let token_req = next_request(sent).await;
        assert_eq!(token_req["messageType"], "AuthenticationTokenRequest");
        assert_eq!(token_req["data"]["pluginName"], "AI Chat Assistant");
        reply(
            inbound,
            &token_req,
            "AuthenticationTokenResponse",
            json!({"authenticationToken": "issued-token"}),
        );

        let auth_req = next_request(sent).await;
        assert_eq!(auth_req["messageType"], "AuthenticationRequest");
        assert_eq!(auth_req["data"]["authenticationToken"], "issued-token");
        reply(
            inbound,
            &auth_req,
            "AuthenticationResponse",
            json!({"authenticated": true, "reason": ""}),
        );
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn unauthenticated_triggers_send_no_frames() {
        let (client, mut sent, _inbound) = test_link(None);

        let hotkey = client.trigger_hotkey("StartSpeaking").await;
        assert!(matches!(hotkey, Err(VtsError::NotAuthenticated)));

        let expression = client.trigger_expression("Joy.exp3.json", true).await;
        assert!(matches!(expression, Err(VtsError::NotAuthenticated)));

        let inject = client
            .inject_parameters(vec![ParameterValue {
                id: "MouthOpen".into(),
                value: 1.0,
            }])
            .await;
        assert!(matches!(inject, Err(VtsError::NotAuthenticated)));

        assert_no_frames(&mut sent);
    }

    #[tokio::test]
    async fn first_authentication_requests_and_stores_a_token() {
        let (client, mut sent, inbound) = test_link(None);

        let (result, ()) =
            tokio::join!(client.authenticate(), serve_first_auth(&mut sent, &inbound));
        result.unwrap();

        assert!(client.is_authenticated());
        assert_eq!(client.session_token().as_deref(), Some("issued-token"));
    }

    #[tokio::test]
    async fn seeded_token_skips_the_token_request() {
        let (client, mut sent, inbound) = test_link(Some("seeded"));

        let host = async {
            let state_req = next_request(&mut sent).await;
            reply(
                &inbound,
                &state_req,
                "APIStateResponse",
                json!({"active": true, "currentSessionAuthenticated": false}),
            );

            let auth_req = next_request(&mut sent).await;
            assert_eq!(auth_req["messageType"], "AuthenticationRequest");
            assert_eq!(auth_req["data"]["authenticationToken"], "seeded");
            reply(
                &inbound,
                &auth_req,
                "AuthenticationResponse",
                json!({"authenticated": true}),
            );
        };
        let (result, ()) = tokio::join!(client.authenticate(), host);
        result.unwrap();
        assert!(client.is_authenticated());
    }

    #[tokio::test]
    async fn already_authenticated_session_needs_only_the_state_query() {
        let (client, mut sent, inbound) = test_link(None);

        let host = async {
            let state_req = next_request(&mut sent).await;
            reply(
                &inbound,
                &state_req,
                "APIStateResponse",
                json!({"active": true, "currentSessionAuthenticated": true}),
            );
        };
        let (result, ()) = tokio::join!(client.authenticate(), host);
        result.unwrap();

        assert!(client.is_authenticated());
        assert!(client.session_token().is_none());
        assert_no_frames(&mut sent);
    }

    #[tokio::test]
    async fn rejected_authentication_stays_unauthenticated() {
        let (client, mut sent, inbound) = test_link(Some("stale"));

        let host = async {
            let state_req = next_request(&mut sent).await;
            reply(
                &inbound,
                &state_req,
                "APIStateResponse",
                json!({"active": true, "currentSessionAuthenticated": false}),
            );
            let auth_req = next_request(&mut sent).await;
            reply(
                &inbound,
                &auth_req,
                "AuthenticationResponse",
                json!({"authenticated": false, "reason": "token revoked"}),
            );
        };
        let (result, ()) = tokio::join!(client.authenticate(), host);
        match result {
            Err(VtsError::AuthenticationRejected(reason)) => assert_eq!(reason, "token revoked"),
            other => panic!("expected a rejection, got {other:?}"),
        }
        assert!(!client.is_authenticated());

        // And triggers still refuse to put anything on the wire.
        let err = client.trigger_hotkey("StartSpeaking").await;
        assert!(matches!(err, Err(VtsError::NotAuthenticated)));
        assert_no_frames(&mut sent);
    }

    #[tokio::test]
    async fn denied_token_request_surfaces_the_host_error() {
        let (client, mut sent, inbound) = test_link(None);

        let host = async {
            let state_req = next_request(&mut sent).await;
            reply(
                &inbound,
                &state_req,
                "APIStateResponse",
                json!({"active": true, "currentSessionAuthenticated": false}),
            );
            let token_req = next_request(&mut sent).await;
            reply(
                &inbound,
                &token_req,
                "APIError",
                json!({"errorID": 50, "message": "user denied plugin access"}),
            );
        };
        let (result, ()) = tokio::join!(client.authenticate(), host);
        match result {
            Err(VtsError::Api { error_id, message }) => {
                assert_eq!(error_id, 50);
                assert_eq!(message, "user denied plugin access");
            }
            other => panic!("expected an API error, got {other:?}"),
        }
        assert!(client.session_token().is_none());
    }

    #[tokio::test]
    async fn start_speaking_sends_hotkey_then_expression() {
        let (client, mut sent, inbound) = test_link(None);
        let (result, ()) =
            tokio::join!(client.authenticate(), serve_first_auth(&mut sent, &inbound));
        result.unwrap();

        client.start_speaking().await.unwrap();

        let first = next_request(&mut sent).await;
        assert_eq!(first["messageType"], "HotkeyTriggerRequest");
        assert_eq!(first["data"]["hotkeyID"], "StartSpeaking");

        let second = next_request(&mut sent).await;
        assert_eq!(second["messageType"], "ExpressionActivationRequest");
        assert_eq!(second["data"]["expressionFile"], "Speaking.exp3.json");
        assert_eq!(second["data"]["active"], true);
    }

    #[tokio::test]
    async fn stop_speaking_sends_idle_hotkey_then_expression_off() {
        let (client, mut sent, inbound) = test_link(None);
        let (result, ()) =
            tokio::join!(client.authenticate(), serve_first_auth(&mut sent, &inbound));
        result.unwrap();

        client.stop_speaking().await.unwrap();

        let first = next_request(&mut sent).await;
        assert_eq!(first["messageType"], "HotkeyTriggerRequest");
        assert_eq!(first["data"]["hotkeyID"], "StopSpeaking");

        let second = next_request(&mut sent).await;
        assert_eq!(second["messageType"], "ExpressionActivationRequest");
        assert_eq!(second["data"]["expressionFile"], "Speaking.exp3.json");
        assert_eq!(second["data"]["active"], false);
    }

    #[tokio::test]
    async fn transport_closure_marks_disconnected_and_refuses_sends() {
        let (client, mut sent, inbound) = test_link(None);
        let (result, ()) =
            tokio::join!(client.authenticate(), serve_first_auth(&mut sent, &inbound));
        result.unwrap();

        drop(inbound);
        let probe = client.clone();
        wait_until(move || !probe.is_connected()).await;

        let err = client.trigger_hotkey("StartSpeaking").await;
        assert!(matches!(err, Err(VtsError::NotConnected)));
        assert_no_frames(&mut sent);
    }

    #[tokio::test]
    async fn interleaved_requests_resolve_by_correlation_id() {
        let (client, mut sent, inbound) = test_link(None);

        let host = async {
            let req_a = next_request(&mut sent).await;
            let req_b = next_request(&mut sent).await;
            assert_ne!(req_a["requestID"], req_b["requestID"]);

            // Answer in reverse order; each waiter must still get its own reply.
            reply(
                &inbound,
                &req_b,
                "APIStateResponse",
                json!({"active": true, "vTubeStudioVersion": "B", "currentSessionAuthenticated": false}),
            );
            reply(
                &inbound,
                &req_a,
                "APIStateResponse",
                json!({"active": true, "vTubeStudioVersion": "A", "currentSessionAuthenticated": false}),
            );
        };

        // `join!` polls in order, so the first call's frame is written first.
        let (state_a, state_b, ()) = tokio::join!(client.api_state(), client.api_state(), host);
        assert_eq!(state_a.unwrap().v_tube_studio_version, "A");
        assert_eq!(state_b.unwrap().v_tube_studio_version, "B");
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (client, mut sent, _inbound) = test_link(None);

        client.disconnect().await;
        assert!(!client.is_connected());
        match sent.next().await {
            Some(Message::Close(_)) => {}
            other => panic!("expected a close frame, got {other:?}"),
        }

        // A second disconnect neither errors nor emits another frame.
        client.disconnect().await;
        assert_no_frames(&mut sent);
    }
}
