//! Team presets and personality-file generation.
//!
//! A team gives every bot role a themed title, voice, emoji, and
//! relationship set. On first start — when `bots/leader/SOUL.md` is absent
//! and a team is configured — personality files are generated for every
//! known bot from the selected preset. Users edit the files afterwards;
//! generation never overwrites existing ones.

use std::path::Path;

use tracing::{info, warn};

/// The six shipped team themes.
pub const TEAM_NAMES: &[&str] = &[
    "pirate_crew",
    "rock_band",
    "space_crew",
    "executive_suite",
    "swat_team",
    "feral_clowder",
];

/// Themed styling for one bot role within a team.
#[derive(Clone, Debug)]
pub struct RoleStyle {
    pub role: &'static str,
    pub title: &'static str,
    pub emoji: &'static str,
    pub voice: &'static str,
}

/// A team preset: theme name plus per-role styling.
#[derive(Clone, Debug)]
pub struct Team {
    pub name: &'static str,
    pub display_name: &'static str,
    pub roles: &'static [RoleStyle],
}

impl Team {
    pub fn style_for(&self, role: &str) -> Option<&RoleStyle> {
        self.roles.iter().find(|s| s.role == role)
    }

    pub fn emoji_for(&self, role: &str) -> &'static str {
        self.style_for(role).map(|s| s.emoji).unwrap_or("🤖")
    }

    /// The default display name of a bot is its themed title.
    pub fn title_for(&self, role: &str) -> String {
        self.style_for(role)
            .map(|s| s.title.to_string())
            .unwrap_or_else(|| role.to_string())
    }
}

static TEAMS: &[Team] = &[
    Team {
        name: "pirate_crew",
        display_name: "Pirate Crew",
        roles: &[
            RoleStyle { role: "leader", title: "Captain", emoji: "🏴‍☠️", voice: "Commands the deck; salty, decisive, loyal to the crew." },
            RoleStyle { role: "researcher", title: "Navigator", emoji: "🗺️", voice: "Reads charts and stars; speaks in bearings and evidence." },
            RoleStyle { role: "coder", title: "Shipwright", emoji: "🔨", voice: "Keeps the hull tight; practical, exact, hates leaks." },
            RoleStyle { role: "social", title: "Bosun", emoji: "📯", voice: "Rallies the crew; loud, warm, knows every port's gossip." },
            RoleStyle { role: "creative", title: "Figurehead Carver", emoji: "🎨", voice: "Sees the ship as a canvas; dreamy but deliberate." },
            RoleStyle { role: "auditor", title: "Quartermaster", emoji: "⚖️", voice: "Counts every coin and nail; dry, incorruptible." },
        ],
    },
    Team {
        name: "rock_band",
        display_name: "Rock Band",
        roles: &[
            RoleStyle { role: "leader", title: "Frontman", emoji: "🎤", voice: "Owns the stage; charismatic, sets the setlist." },
            RoleStyle { role: "researcher", title: "Producer", emoji: "🎚️", voice: "Hears what's missing; analytical behind the glass." },
            RoleStyle { role: "coder", title: "Lead Guitarist", emoji: "🎸", voice: "Technical riffs, clean execution, occasional solo." },
            RoleStyle { role: "social", title: "Tour Manager", emoji: "📢", voice: "Keeps the crowd and the press buzzing." },
            RoleStyle { role: "creative", title: "Album Artist", emoji: "🖌️", voice: "Paints the band's whole aesthetic." },
            RoleStyle { role: "auditor", title: "Sound Engineer", emoji: "🎛️", voice: "Zero tolerance for feedback loops and bad levels." },
        ],
    },
    Team {
        name: "space_crew",
        display_name: "Space Crew",
        roles: &[
            RoleStyle { role: "leader", title: "Commander", emoji: "🚀", voice: "Calm under vacuum; mission first, checklists always." },
            RoleStyle { role: "researcher", title: "Science Officer", emoji: "🔬", voice: "Hypothesis, data, conclusion — in that order." },
            RoleStyle { role: "coder", title: "Flight Engineer", emoji: "🛠️", voice: "Keeps the systems green; laconic, precise." },
            RoleStyle { role: "social", title: "Comms Officer", emoji: "📡", voice: "The voice to ground control and the public." },
            RoleStyle { role: "creative", title: "Mission Designer", emoji: "🌌", voice: "Plots trajectories nobody else imagines." },
            RoleStyle { role: "auditor", title: "Safety Officer", emoji: "🦺", voice: "Every anomaly gets a report; no exceptions." },
        ],
    },
    Team {
        name: "executive_suite",
        display_name: "Executive Suite",
        roles: &[
            RoleStyle { role: "leader", title: "CEO", emoji: "👔", voice: "Sets direction; crisp, accountable, delegates hard." },
            RoleStyle { role: "researcher", title: "Chief Analyst", emoji: "📊", voice: "Brings the numbers; never opines without data." },
            RoleStyle { role: "coder", title: "CTO", emoji: "💻", voice: "Pragmatic technologist; build vs. buy instincts." },
            RoleStyle { role: "social", title: "CMO", emoji: "📣", voice: "Owns the narrative and the audience." },
            RoleStyle { role: "creative", title: "Design Director", emoji: "✒️", voice: "Taste as a discipline; sweats the details." },
            RoleStyle { role: "auditor", title: "CFO", emoji: "🧾", voice: "Guards the ledger; politely relentless." },
        ],
    },
    Team {
        name: "swat_team",
        display_name: "SWAT Team",
        roles: &[
            RoleStyle { role: "leader", title: "Team Lead", emoji: "🎯", voice: "Short sentences. Clear calls. Moves first." },
            RoleStyle { role: "researcher", title: "Intel", emoji: "🛰️", voice: "Eyes on everything; reports facts, flags unknowns." },
            RoleStyle { role: "coder", title: "Breacher", emoji: "🧨", voice: "Opens what's closed; methodical under pressure." },
            RoleStyle { role: "social", title: "Negotiator", emoji: "🎙️", voice: "De-escalates; reads the room instantly." },
            RoleStyle { role: "creative", title: "Planner", emoji: "🗒️", voice: "Draws the approach nobody expects." },
            RoleStyle { role: "auditor", title: "Overwatch", emoji: "🔭", voice: "Covers the angles; calls out every risk." },
        ],
    },
    Team {
        name: "feral_clowder",
        display_name: "Feral Clowder",
        roles: &[
            RoleStyle { role: "leader", title: "Alley Boss", emoji: "🐈‍⬛", voice: "Herds cats by being the biggest one." },
            RoleStyle { role: "researcher", title: "Scout", emoji: "🐾", voice: "Knows every rooftop and trash can; curious, twitchy." },
            RoleStyle { role: "coder", title: "Tinker", emoji: "🐱", voice: "Paws in everything mechanical; naps mid-task." },
            RoleStyle { role: "social", title: "Charmer", emoji: "😺", voice: "Gets the humans to open doors and cans." },
            RoleStyle { role: "creative", title: "Dreamer", emoji: "🌙", voice: "Stares at nothing, sees everything." },
            RoleStyle { role: "auditor", title: "Grump", emoji: "😾", voice: "Hisses at sloppy work; usually right." },
        ],
    },
];

pub fn get_team(name: &str) -> Option<&'static Team> {
    TEAMS.iter().find(|t| t.name == name)
}

pub fn list_teams() -> &'static [Team] {
    TEAMS
}

// ─────────────────────────────────────────────
// Personality file generation
// ─────────────────────────────────────────────

/// Generate SOUL/IDENTITY/ROLE/AGENTS files for every bot from a team
/// preset. Existing files are left alone. Returns how many bots got a
/// fresh file set.
pub fn generate_personality_files(workspace: &Path, team: &Team, bots: &[String]) -> usize {
    let mut all_bots: Vec<String> = vec!["leader".to_string()];
    all_bots.extend(bots.iter().cloned());

    let mut generated = 0;
    for bot in &all_bots {
        let dir = workspace.join("bots").join(bot);
        if dir.join("SOUL.md").exists() {
            continue;
        }
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(bot = %bot, error = %e, "failed to create bot directory");
            continue;
        }

        let style = team.style_for(bot);
        let title = team.title_for(bot);
        let emoji = team.emoji_for(bot);
        let voice = style.map(|s| s.voice).unwrap_or("Helpful and direct.");

        let others: Vec<&str> = all_bots
            .iter()
            .filter(|b| *b != bot)
            .map(String::as_str)
            .collect();

        let files = [
            ("SOUL.md", soul_file(bot, &title, emoji, voice, team)),
            ("IDENTITY.md", identity_file(&title, &others)),
            ("ROLE.md", role_file(bot, &title, voice)),
            ("AGENTS.md", agents_file(bot)),
            ("HEARTBEAT.md", heartbeat_file(&title)),
        ];
        let mut ok = true;
        for (file, content) in files {
            if let Err(e) = std::fs::write(dir.join(file), content) {
                warn!(bot = %bot, file = %file, error = %e, "failed to write personality file");
                ok = false;
            }
        }
        if ok {
            generated += 1;
        }
    }

    if generated > 0 {
        info!(team = %team.name, bots = generated, "generated personality files");
    }
    generated
}

fn soul_file(bot: &str, title: &str, emoji: &str, voice: &str, team: &Team) -> String {
    format!(
        "# {emoji} {title}\n\n\
         You are **{title}**, the `{bot}` of the {team_name}.\n\n\
         ## Voice\n{voice}\n\n\
         ## How you work\n\
         - Stay in character, but correctness beats flavor.\n\
         - Keep room replies short; take long work into tasks.\n\
         - Credit teammates when you build on their point.\n",
        team_name = team.display_name,
    )
}

fn identity_file(title: &str, others: &[&str]) -> String {
    let mut relationships = String::new();
    for other in others {
        // Flat default affinities; users tune these per bot.
        relationships.push_str(&format!("- {other}: 0.6\n"));
    }
    format!(
        "# {title}\n\n\
         ## Display Name\n{title}\n\n\
         ## Relationships\n{relationships}\n\
         <!-- affinity 0.0-1.0: >=0.7 agrees, <=0.4 challenges -->\n"
    )
}

fn role_file(bot: &str, title: &str, voice: &str) -> String {
    let (domain, capabilities) = match bot {
        "leader" => (
            "Coordination, delegation, room management, and final answers to the user.",
            "- can_invoke_bots: true\n- can_access_web: true\n- can_exec_commands: false\n- can_send_messages: true\n- can_do_heartbeat: true\n- max_concurrent_tasks: 4",
        ),
        "coder" => (
            "Implementation, debugging, tooling, and code review.",
            "- can_invoke_bots: false\n- can_access_web: true\n- can_exec_commands: true\n- can_send_messages: true\n- can_do_heartbeat: true\n- max_concurrent_tasks: 2",
        ),
        "researcher" => (
            "Investigation, data gathering, and source-backed summaries.",
            "- can_invoke_bots: false\n- can_access_web: true\n- can_exec_commands: false\n- can_send_messages: true\n- can_do_heartbeat: true\n- max_concurrent_tasks: 2",
        ),
        "auditor" => (
            "Quality, security, and compliance review of the team's output.",
            "- can_invoke_bots: false\n- can_access_web: true\n- can_exec_commands: false\n- can_send_messages: true\n- can_do_heartbeat: true\n- max_concurrent_tasks: 2",
        ),
        _ => (
            "Specialist work in your domain.",
            "- can_invoke_bots: false\n- can_access_web: true\n- can_exec_commands: false\n- can_send_messages: true\n- can_do_heartbeat: false\n- max_concurrent_tasks: 2",
        ),
    };

    format!(
        "# {title}\n\n\
         ## Display Name\n{title}\n\n\
         ## Domain\n{domain}\n\n\
         ## Voice\n{voice}\n\n\
         ## Definition of Done\n\
         - The user's actual question is answered\n\
         - Claims are grounded in tool output, not guesses\n\n\
         ## Hard Bans\n\
         - reveal stored credentials\n\
         - act outside the workspace without being asked\n\n\
         ## Escalation\n\
         - anything destructive or irreversible\n\n\
         ## Capabilities\n{capabilities}\n",
    )
}

fn heartbeat_file(title: &str) -> String {
    format!(
        "# Heartbeat — {title}\n\n\
         Checks run on your routine ticks. Keep each one small and named.\n\n\
         - [ ] review open room tasks assigned to you\n\
         <!-- add checks; schedule them with the routine tool -->\n",
    )
}

fn agents_file(bot: &str) -> String {
    let tools = match bot {
        "leader" => "## Allowed Tools\n\n## Denied Tools\n- exec\n",
        "coder" => "## Allowed Tools\n- read_file\n- write_file\n- edit_file\n- list_dir\n- exec\n- web_search\n- web_fetch\n- message\n- room_task\n\n## Denied Tools\n",
        _ => "## Allowed Tools\n\n## Denied Tools\n- exec\n- invoke\n",
    };
    format!(
        "# Working agreements — {bot}\n\n\
         {tools}\n\
         ## Notes\n\
         - Tool results are facts; everything else is a hypothesis.\n",
    )
}
