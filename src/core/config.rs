//! Centralized configuration constants for peerlink.
//!
//! All tunable parameters live here so they can be reviewed and adjusted
//! in a single place. Wire-format markers stay in their respective modules.

use std::time::Duration;

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Size of one binary file slice on the wire (16 KiB).
///
/// Small enough to stay below the 64 KB SCTP message ceiling that most
/// data-channel implementations still default to.
pub const CHUNK_SIZE: usize = 16 * 1024;

// ── Handshake / Candidate gathering ──────────────────────────────────────────

/// Quiet period after the last discovered route candidate before the
/// gathered set is considered final.
pub const CANDIDATE_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Hard ceiling, counted from the first observed candidate, after which
/// gathering finalizes even if candidates keep trickling in.
pub const CANDIDATE_SETTLE_CEILING: Duration = Duration::from_secs(5);

/// Overall limit for candidate gathering when nothing is ever observed.
pub const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(15);

/// Limit for a relay-assisted dial to reach an open channel.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Limit for the relay to confirm our identity after `hello`.
pub const RELAY_WELCOME_TIMEOUT: Duration = Duration::from_secs(10);

/// STUN server used when none is configured.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Label of the single ordered data channel opened per connection.
pub const DATA_CHANNEL_LABEL: &str = "peerlink";

/// Pause outgoing sends while the channel buffers more than this.
pub const DC_BUFFERED_AMOUNT_HIGH: usize = 1024 * 1024; // 1 MB

/// Give up waiting for the send buffer to drain after this long.
pub const DC_BUFFER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for the send buffer to drain.
pub const DC_BUFFER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Largest decompressed connection code accepted. Real codes stay well
/// under a few kilobytes.
pub const MAX_TICKET_BYTES: usize = 64 * 1024;

// ── Links ────────────────────────────────────────────────────────────────────

/// Origin used to build shareable links when none is configured.
pub const DEFAULT_ORIGIN: &str = "http://localhost:5173/";

/// Query parameter carrying the peer identity (discovery mode).
pub const LINK_PEER_PARAM: &str = "peer";

/// Fragment key carrying the offer token (manual mode).
pub const LINK_SESSION_KEY: &str = "session";

// ── Session storage keys ─────────────────────────────────────────────────────

/// Local endpoint identity.
pub const IDENTITY_KEY: &str = "peerlink.identity";

/// Ordered set of remote identifiers restored on reload.
pub const PEERS_KEY: &str = "peerlink.peers";

/// File name of the JSON session store inside the data directory.
pub const SESSION_STORE_FILE: &str = "session.json";

// ── UI / Misc ────────────────────────────────────────────────────────────────

/// Status shown after a successful clipboard copy.
pub const COPY_OK_STATUS: &str = "Copied!";

/// Status shown when the clipboard could not be written.
pub const COPY_FAILED_STATUS: &str = "Failed to copy";
