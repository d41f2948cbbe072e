//! Room management commands.

use anyhow::Result;
use clap::Subcommand;

use crewgate_core::rooms::RoomManager;
use crewgate_core::utils::get_data_path;

#[derive(Subcommand)]
pub enum RoomsCommands {
    /// List all rooms
    List,

    /// Create a project room
    Create {
        /// Room name (slugified into the id)
        name: String,
        /// Bots to invite, comma-separated (leader is always included)
        #[arg(short, long, default_value = "")]
        bots: String,
    },

    /// Invite a bot to a room
    Invite { room_id: String, bot: String },

    /// Remove a bot from a room
    Remove { room_id: String, bot: String },

    /// Join a channel conversation to a room
    Join {
        channel: String,
        chat_id: String,
        room_id: String,
    },

    /// Detach a channel conversation from its room
    Leave { channel: String, chat_id: String },
}

pub fn dispatch(action: RoomsCommands) -> Result<()> {
    let rooms = RoomManager::new(get_data_path())?;

    match action {
        RoomsCommands::List => {
            for room in rooms.list_rooms() {
                println!(
                    "{} ({:?}) — bots: {}, tasks: {}",
                    room.id,
                    room.room_type,
                    room.participants.join(", "),
                    room.tasks.len()
                );
                for (channel, chat_id) in rooms.channel_mappings_for_room(&room.id) {
                    println!("    ↳ {channel}:{chat_id}");
                }
            }
        }
        RoomsCommands::Create { name, bots } => {
            let bots: Vec<String> = bots
                .split(',')
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty())
                .collect();
            let room = rooms.create_project_room(&name, bots)?;
            println!("created {} with {}", room.id, room.participants.join(", "));
        }
        RoomsCommands::Invite { room_id, bot } => {
            if rooms.invite_bot(&room_id, &bot) {
                println!("invited {bot} to {room_id}");
            } else {
                println!("no change (room missing or bot already present)");
            }
        }
        RoomsCommands::Remove { room_id, bot } => {
            if rooms.remove_bot(&room_id, &bot) {
                println!("removed {bot} from {room_id}");
            } else {
                println!("no change (room missing, bot absent, or last bot)");
            }
        }
        RoomsCommands::Join {
            channel,
            chat_id,
            room_id,
        } => {
            rooms.join_channel_to_room(&channel, &chat_id, &room_id)?;
            println!("joined {channel}:{chat_id} → {room_id}");
        }
        RoomsCommands::Leave { channel, chat_id } => {
            if rooms.leave_channel_from_room(&channel, &chat_id) {
                println!("detached {channel}:{chat_id}");
            } else {
                println!("{channel}:{chat_id} was not mapped");
            }
        }
    }

    Ok(())
}
