//! Platform independent core of the proxify layer.
//!
//! The platform layer (`proxify-layer-win`) owns the intercepts and hands every connection
//! attempt to the types in here:
//!
//! - [`selector::ConnectSelector`] decides whether a destination is bypassed, blocked or
//!   redirected;
//! - [`redirect::Redirector`] takes over a socket, connects it to the proxy and runs the
//!   [`handshake`];
//! - [`fakeip::FakeIpTable`] mints synthetic addresses for hostnames during name resolution
//!   ([`dns`]) and maps them back at connect time;
//! - [`datagram::DatagramPolicy`] rejects UDP that would escape the proxy.
//!
//! All of them borrow from a single [`setup::LayerSetup`], created once after the DLL is loaded.

pub mod datagram;
pub mod detour;
pub mod dns;
pub mod error;
pub mod fakeip;
pub mod handshake;
pub mod hooks;
pub mod logging;
pub mod process;
pub mod redirect;
pub mod selector;
pub mod setup;
pub mod str_win;
