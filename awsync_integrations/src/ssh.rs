//! `RemoteShell` over SSH, using `russh`.
//!
//! One `RusshShell` is one SSH connection. Each `exec` opens a fresh session channel on it,
//! so commands on one shell run strictly one after another.

use awsync_core::config::RemoteConfig;
use awsync_core::{Error, OutputStream, RemoteShell, Result, ShellConnector};
use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Handle, Msg};
use russh::keys::ssh_key::{HashAlg, PrivateKey, PublicKey};
use russh::keys::{PrivateKeyWithHashAlg, decode_secret_key};
use russh::{Channel, ChannelMsg, Disconnect};
use std::sync::Arc;

/// Longest stderr excerpt carried in an error message.
const STDERR_EXCERPT: usize = 512;

/// Host key policy: accept anything when no pin is configured, otherwise require an exact
/// `SHA256:` fingerprint match.
pub fn host_key_accepted(expected: Option<&str>, actual: &str) -> bool {
    match expected {
        None => true,
        Some(expected) => expected.trim() == actual,
    }
}

struct HostKeyCheck {
    expected: Option<String>,
}

impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        let accepted = host_key_accepted(self.expected.as_deref(), &fingerprint);
        if self.expected.is_none() {
            tracing::warn!(%fingerprint, "host key not pinned; accepting");
        } else if !accepted {
            tracing::error!(%fingerprint, "host key does not match SSH_HOST_KEY_FINGERPRINT");
        }
        Ok(accepted)
    }
}

/// Hands out one `RusshShell` per run. The private key is decoded once, up front.
pub struct RusshConnector {
    config: Arc<RemoteConfig>,
    key: Arc<PrivateKey>,
}

impl RusshConnector {
    #[tracing::instrument(level = "debug", skip(config), fields(target = %config.target()))]
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let pem = config.private_key.load()?;
        let key = decode_secret_key(&pem, None)
            .map_err(|e| Error::connection("decode ssh private key", e))?;
        Ok(Self {
            config: Arc::new(config),
            key: Arc::new(key),
        })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn shell(&self) -> RusshShell {
        RusshShell {
            config: self.config.clone(),
            key: self.key.clone(),
            handle: None,
        }
    }
}

impl ShellConnector for RusshConnector {
    fn target(&self) -> String {
        self.config.target()
    }

    fn session(&self) -> Box<dyn RemoteShell> {
        Box::new(self.shell())
    }
}

pub struct RusshShell {
    config: Arc<RemoteConfig>,
    key: Arc<PrivateKey>,
    handle: Option<Handle<HostKeyCheck>>,
}

impl RusshShell {
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }
}

async fn handshake(
    cfg: Arc<RemoteConfig>,
    key: Arc<PrivateKey>,
) -> Result<Handle<HostKeyCheck>> {
    let target = cfg.target();
    let ssh_config = Arc::new(client::Config::default());
    let handler = HostKeyCheck {
        expected: cfg.host_key_fingerprint.clone(),
    };

    let mut handle = client::connect(ssh_config, (cfg.host.as_str(), cfg.port), handler)
        .await
        .map_err(|e| Error::connection(format!("connect {target}"), e))?;

    let hash_alg = handle
        .best_supported_rsa_hash()
        .await
        .map_err(|e| Error::connection("negotiate rsa hash", e))?
        .flatten();
    let auth = handle
        .authenticate_publickey(
            cfg.username.as_str(),
            PrivateKeyWithHashAlg::new(key, hash_alg),
        )
        .await
        .map_err(|e| Error::connection(format!("authenticate {target}"), e))?;
    if !auth.success() {
        return Err(Error::connection_message(format!(
            "public key authentication rejected for {target}"
        )));
    }
    Ok(handle)
}

#[async_trait]
impl RemoteShell for RusshShell {
    #[tracing::instrument(
        level = "info",
        name = "awsync.ssh.open",
        skip(self),
        fields(target = %self.config.target())
    )]
    async fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let timeout = self.config.connect_timeout;
        let attempt = handshake(self.config.clone(), self.key.clone());
        let handle = match tokio::time::timeout(timeout, attempt).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(Error::connection_message(format!(
                    "ssh handshake with {} timed out after {}s",
                    self.config.target(),
                    timeout.as_secs()
                )));
            }
        };
        self.handle = Some(handle);
        tracing::info!("ssh session ready");
        Ok(())
    }

    #[tracing::instrument(level = "debug", name = "awsync.ssh.exec", skip(self, command))]
    async fn exec(&mut self, command: &str) -> Result<OutputStream> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(Error::connection_message("ssh session is not open"));
        };
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| Error::remote_exec("open session channel", e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::remote_exec("dispatch command", e))?;

        let state = ExecState {
            channel,
            stderr: Vec::new(),
            exit_status: None,
            finished: false,
        };
        Ok(Box::pin(futures_util::stream::unfold(state, next_chunk)))
    }

    #[tracing::instrument(level = "info", name = "awsync.ssh.close", skip(self))]
    async fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            tracing::warn!(error = %e, "ssh disconnect failed");
        }
    }
}

struct ExecState {
    channel: Channel<Msg>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
    finished: bool,
}

async fn next_chunk(mut st: ExecState) -> Option<(Result<Bytes>, ExecState)> {
    if st.finished {
        return None;
    }
    loop {
        match st.channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                return Some((Ok(Bytes::copy_from_slice(&data)), st));
            }
            Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                st.stderr.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                st.exit_status = Some(exit_status);
            }
            Some(_) => {}
            None => {
                st.finished = true;
                tracing::debug!(exit_code = ?st.exit_status, "remote command finished");
                return match exit_error(st.exit_status, &st.stderr) {
                    None => None,
                    Some(err) => Some((Err(err), st)),
                };
            }
        }
    }
}

/// Map the final channel state to an error, if the command did not succeed.
pub fn exit_error(exit_status: Option<u32>, stderr: &[u8]) -> Option<Error> {
    let reason = match exit_status {
        Some(0) => return None,
        Some(code) => format!("remote command exited with status {code}"),
        None => "remote command ended without an exit status".to_string(),
    };
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        return Some(Error::remote_exec_message(reason));
    }
    let excerpt: String = stderr.chars().take(STDERR_EXCERPT).collect();
    Some(Error::remote_exec_message(format!("{reason}: {excerpt}")))
}
