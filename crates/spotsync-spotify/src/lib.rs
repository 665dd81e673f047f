// SPDX-License-Identifier: GPL-3.0-or-later

//! Spotify Web API client used to resolve shared links.
//!
//! Given an `open.spotify.com` link the client tells what it points at, what
//! it is called, and which tracks it contains. Paging through long playlists
//! and refreshing the client-credentials token are handled here so callers
//! only ever see complete results.

pub mod client;
pub mod error;
pub mod models;
pub mod reference;
mod token;

pub use client::{SpotifyClient, SpotifyClientBuilder};
pub use error::{Result, SpotifyError};
pub use models::TrackListing;
pub use reference::{SpotifyObjectType, SpotifyReference, SPOTIFY_URL_PREFIX};
