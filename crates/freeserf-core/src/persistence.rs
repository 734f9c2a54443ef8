//! Save/Load functionality for persisting game state
//!
//! The whole `Game` is serialized in one piece: map, players, every
//! collection and both random streams. Binary saves use bincode; the
//! text form is JSON and meant for inspection and diffing.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;

use crate::game::Game;

/// Version number for save file format (increment when format changes)
pub const SAVE_VERSION: u32 = 1;

/// Serializable snapshot of the game
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveData {
    /// Save format version
    pub version: u32,
    pub game: Game,
}

/// Borrowed form of `SaveData` so saving does not clone the world.
#[derive(Serialize)]
struct SaveRef<'a> {
    version: u32,
    game: &'a Game,
}

/// Errors that can occur during save/load
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

fn check_version(data: SaveData) -> Result<Game, SaveError> {
    if data.version != SAVE_VERSION {
        return Err(SaveError::VersionMismatch {
            expected: SAVE_VERSION,
            found: data.version,
        });
    }
    Ok(data.game)
}

/// Save the complete game to a writer
pub fn save_binary<W: Write>(writer: W, game: &Game) -> Result<(), SaveError> {
    let data = SaveRef {
        version: SAVE_VERSION,
        game,
    };
    bincode::serialize_into(writer, &data)?;
    log::debug!("game saved at tick {}", game.tick());
    Ok(())
}

/// Load a game from a reader
pub fn load_binary<R: Read>(reader: R) -> Result<Game, SaveError> {
    let data: SaveData = bincode::deserialize_from(reader)?;
    let game = check_version(data)?;
    log::debug!("game loaded at tick {}", game.tick());
    Ok(game)
}

/// Save the game as pretty-printed JSON.
pub fn save_text<W: Write>(writer: W, game: &Game) -> Result<(), SaveError> {
    let data = SaveRef {
        version: SAVE_VERSION,
        game,
    };
    serde_json::to_writer_pretty(writer, &data)?;
    Ok(())
}

pub fn load_text<R: Read>(reader: R) -> Result<Game, SaveError> {
    let data: SaveData = serde_json::from_reader(reader)?;
    check_version(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tests::game_with_castle;

    #[test]
    fn test_binary_round_trip() {
        let (mut game, _) = game_with_castle();
        game.run(20).expect("run");

        let mut buf = Vec::new();
        save_binary(&mut buf, &game).expect("save");
        let loaded = load_binary(buf.as_slice()).expect("load");
        assert_eq!(loaded, game);
    }

    #[test]
    fn test_text_round_trip() {
        let (game, _) = game_with_castle();
        let mut buf = Vec::new();
        save_text(&mut buf, &game).expect("save");
        let loaded = load_text(buf.as_slice()).expect("load");
        assert_eq!(loaded, game);
    }

    #[test]
    fn test_version_mismatch() {
        let (game, _) = game_with_castle();
        let data = SaveRef {
            version: SAVE_VERSION + 1,
            game: &game,
        };
        let buf = bincode::serialize(&data).expect("serialize");
        match load_binary(buf.as_slice()) {
            Err(SaveError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, SAVE_VERSION);
                assert_eq!(found, SAVE_VERSION + 1);
            }
            other => panic!("expected version mismatch, got {:?}", other.map(|g| g.tick())),
        }
    }

    #[test]
    fn test_truncated_save_fails() {
        let (game, _) = game_with_castle();
        let mut buf = Vec::new();
        save_binary(&mut buf, &game).expect("save");
        buf.truncate(buf.len() / 2);
        assert!(load_binary(buf.as_slice()).is_err());
    }
}
