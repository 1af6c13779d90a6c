//! Page-level building blocks of the crawler: site profiles, the browser
//! session seam, challenge detection, link handling and video discovery.

pub mod browser;
pub mod challenge;
pub mod discovery;
pub mod links;
pub mod profile;

pub use browser::{BrowserSession, BrowserSettings, ChromeLauncher, PageSnapshot, SessionLauncher};
pub use challenge::{ChallengeDetector, ChallengeState};
pub use discovery::{DiscoveryReport, DiscoveryTiming, VideoDiscovery};
pub use profile::{CompiledProfile, ProfileRegistry, SiteProfile};
