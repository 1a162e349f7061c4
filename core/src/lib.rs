//! Chord and Pastry DHT node protocols running over a shared abstract
//! switch fabric (spec §1): construct a network of switches, attach nodes
//! of either protocol to it, drive joins/departures/stores/searches, and
//! observe hop counts and lookup success under churn.

pub mod chord;
pub mod error;
pub mod fabric;
pub mod hashing;
pub mod ids;
pub mod pastry;
pub mod ring;
pub mod rng;

pub use chord::{ChordNetwork, ChordNode};
pub use error::DhtError;
pub use fabric::{Fabric, Link};
pub use ids::{NodeId, SwitchId};
pub use pastry::{PastryNetwork, PastryNode};
pub use rng::FastRng;
