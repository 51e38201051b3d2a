//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                                 |
//! |-----------|--------------------------------------------------|
//! | `session` | `Register`, `Login`, `Logout`, `Whoami`          |
//! | `board`   | `Boards`, `Show`, `MoveColumn`, `MoveCard`       |
//! | `collab`  | `Search`, `Invitations`                          |
//! | `config`  | `Config`                                         |

pub mod board;
pub mod collab;
pub mod config;
pub mod session;

pub use board::{cmd_boards, cmd_move_card, cmd_move_column, cmd_show};
pub use collab::{cmd_invitations, cmd_search};
pub use config::cmd_config;
pub use session::{cmd_login, cmd_logout, cmd_register, cmd_whoami};
