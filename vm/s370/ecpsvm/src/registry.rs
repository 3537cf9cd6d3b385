// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-assist enables, debug switches and statistics, shared by every engine
//! of a machine.

use crate::config::EcpsVmConfig;
use crate::config::DEFAULT_LEVEL;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use thiserror::Error;

/// The two families of assists.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AssistClass {
    /// Assists for instructions a virtual machine issues in real problem
    /// state.
    Vm,
    /// Assists for control program routines, issued in supervisor state.
    Cp,
}

impl AssistClass {
    /// Name used in statistics output.
    pub fn name(self) -> &'static str {
        match self {
            AssistClass::Vm => "VM ASSIST",
            AssistClass::Cp => "CP ASSIST",
        }
    }
}

macro_rules! assists {
    ($($variant:ident = ($name:literal, $class:ident, $supported:literal)),* $(,)?) => {
        /// An assist, by mnemonic.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        pub enum Assist {
            $(
                #[doc = concat!("The ", $name, " assist.")]
                $variant,
            )*
        }

        impl Assist {
            /// Every assist, in registry order.
            pub const ALL: &'static [Assist] = &[$(Assist::$variant),*];

            /// The mnemonic.
            pub fn name(self) -> &'static str {
                match self {
                    $(Assist::$variant => $name,)*
                }
            }

            /// The class the assist belongs to.
            pub fn class(self) -> AssistClass {
                match self {
                    $(Assist::$variant => AssistClass::$class,)*
                }
            }

            /// Whether the engine performs this assist at all. Unsupported
            /// assists always decline.
            pub fn is_supported(self) -> bool {
                match self {
                    $(Assist::$variant => $supported,)*
                }
            }
        }
    };
}

assists! {
    Svc = ("SVC", Vm, true),
    Ssm = ("SSM", Vm, true),
    Lpsw = ("LPSW", Vm, true),
    Stnsm = ("STNSM", Vm, false),
    Stosm = ("STOSM", Vm, false),
    Sio = ("SIO", Vm, false),
    Vtimer = ("VTIMER", Vm, true),
    Stctl = ("STCTL", Vm, false),
    Lctl = ("LCTL", Vm, true),
    Diag = ("DIAG", Vm, false),
    Iucv = ("IUCV", Vm, false),
    Free = ("FREE", Cp, false),
    Fret = ("FRET", Cp, false),
    Lckpg = ("LCKPG", Cp, true),
    Ulkpg = ("ULKPG", Cp, true),
    Scnru = ("SCNRU", Cp, true),
    Scnvu = ("SCNVU", Cp, true),
    Disp0 = ("DISP0", Cp, true),
    Disp1 = ("DISP1", Cp, true),
    Disp2 = ("DISP2", Cp, true),
    Dnccw = ("DNCCW", Cp, false),
    Dfccw = ("DFCCW", Cp, false),
    Fccws = ("FCCWS", Cp, false),
    Ccwgn = ("CCWGN", Cp, false),
    Uxccw = ("UXCCW", Cp, false),
    Trbrg = ("TRBRG", Cp, true),
    Trlok = ("TRLOK", Cp, true),
    Vist = ("VIST", Cp, false),
    Vipt = ("VIPT", Cp, false),
    Stevl = ("STEVL", Cp, true),
    Freex = ("FREEX", Cp, true),
    Fretx = ("FRETX", Cp, true),
    Pmass = ("PMASS", Cp, false),
    Lcspg = ("LCSPG", Cp, false),
}

impl Assist {
    fn index(self) -> usize {
        self as usize
    }
}

impl Display for Assist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// The name does not match any assist.
#[derive(Debug, Error)]
#[error("unknown ECPS:VM assist {0:?}")]
pub struct UnknownAssist(pub String);

impl FromStr for Assist {
    type Err = UnknownAssist;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Assist::ALL
            .iter()
            .copied()
            .find(|a| a.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownAssist(s.to_owned()))
    }
}

/// Which assists an administrative operation applies to.
#[derive(Debug, Copy, Clone)]
pub enum Selector<'a> {
    All,
    Class(AssistClass),
    /// A single assist by mnemonic, matched without regard to case.
    Named(&'a str),
}

#[derive(Debug)]
struct Entry {
    enabled: AtomicBool,
    debug: AtomicBool,
    calls: AtomicU64,
    hits: AtomicU64,
}

/// Registry of assist enables and counters. One registry is shared by all
/// engines of a machine.
#[derive(Debug)]
pub struct AssistRegistry {
    available: AtomicBool,
    level: AtomicU32,
    entries: Vec<Entry>,
}

impl AssistRegistry {
    /// Builds a registry from configuration. Supported assists start enabled
    /// unless named in `config.disabled`.
    pub fn new(config: &EcpsVmConfig) -> Result<Self, UnknownAssist> {
        let entries = Assist::ALL
            .iter()
            .map(|a| Entry {
                enabled: AtomicBool::new(a.is_supported()),
                debug: AtomicBool::new(config.debug),
                calls: AtomicU64::new(0),
                hits: AtomicU64::new(0),
            })
            .collect();
        let this = Self {
            available: AtomicBool::new(config.available),
            level: AtomicU32::new(DEFAULT_LEVEL),
            entries,
        };
        for name in &config.disabled {
            this.disable(Selector::Named(name))?;
        }
        this.set_level(config.level);
        Ok(this)
    }

    fn entry(&self, assist: Assist) -> &Entry {
        &self.entries[assist.index()]
    }

    fn select(&self, selector: Selector<'_>) -> Result<Vec<Assist>, UnknownAssist> {
        Ok(match selector {
            Selector::All => Assist::ALL.to_vec(),
            Selector::Class(class) => Assist::ALL
                .iter()
                .copied()
                .filter(|a| a.class() == class)
                .collect(),
            Selector::Named(name) => vec![name.parse()?],
        })
    }

    /// Whether the facility is installed.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Installs or removes the facility.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
        tracing::info!(available, "ECPS:VM availability changed");
    }

    /// The level reported by STEVL.
    pub fn level(&self) -> u32 {
        self.level.load(Ordering::Relaxed)
    }

    /// Sets the level reported by STEVL.
    pub fn set_level(&self, level: u32) {
        self.level.store(level, Ordering::Relaxed);
        if level != DEFAULT_LEVEL {
            tracing::warn!(
                level,
                supported = DEFAULT_LEVEL,
                "reported ECPS:VM level is not the supported level"
            );
        }
    }

    /// Enables the selected assists. Returns how many were affected.
    pub fn enable(&self, selector: Selector<'_>) -> Result<usize, UnknownAssist> {
        self.set_enabled(selector, true)
    }

    /// Disables the selected assists. Returns how many were affected.
    pub fn disable(&self, selector: Selector<'_>) -> Result<usize, UnknownAssist> {
        self.set_enabled(selector, false)
    }

    fn set_enabled(&self, selector: Selector<'_>, enabled: bool) -> Result<usize, UnknownAssist> {
        let selected = self.select(selector)?;
        for &assist in &selected {
            self.entry(assist).enabled.store(enabled, Ordering::Relaxed);
            tracing::debug!(assist = assist.name(), enabled, "assist enable changed");
        }
        Ok(selected.len())
    }

    /// Turns debug logging of the selected assists on or off.
    pub fn set_debug(&self, selector: Selector<'_>, debug: bool) -> Result<usize, UnknownAssist> {
        let on = debug;
        let selected = self.select(selector)?;
        for &assist in &selected {
            self.entry(assist).debug.store(debug, Ordering::Relaxed);
        }
        tracing::debug!(count = selected.len(), debug = on, "assist debug changed");
        Ok(selected.len())
    }

    /// Whether the assist is enabled.
    pub fn is_enabled(&self, assist: Assist) -> bool {
        self.entry(assist).enabled.load(Ordering::Relaxed)
    }

    /// Whether debug logging is on for the assist.
    pub fn is_debug(&self, assist: Assist) -> bool {
        self.entry(assist).debug.load(Ordering::Relaxed)
    }

    pub(crate) fn record_call(&self, assist: Assist) {
        self.entry(assist).calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hit(&self, assist: Assist) {
        self.entry(assist).hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Counters for one assist.
    pub fn statistic(&self, assist: Assist) -> AssistStatistic {
        let entry = self.entry(assist);
        AssistStatistic {
            assist,
            calls: entry.calls.load(Ordering::Relaxed),
            hits: entry.hits.load(Ordering::Relaxed),
            enabled: entry.enabled.load(Ordering::Relaxed),
            debug: entry.debug.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of the counters of one class, busiest assist first. Assists
    /// that were never called are counted but not listed.
    pub fn statistics(&self, class: AssistClass) -> StatisticsReport {
        let mut entries = Vec::new();
        let mut not_shown = 0;
        for &assist in Assist::ALL.iter().filter(|a| a.class() == class) {
            let stat = self.statistic(assist);
            if stat.calls == 0 {
                not_shown += 1;
            } else {
                entries.push(stat);
            }
        }
        entries.sort_by(|a, b| b.calls.cmp(&a.calls));
        StatisticsReport {
            class,
            entries,
            not_shown,
        }
    }
}

/// Counters and switches of one assist.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AssistStatistic {
    pub assist: Assist,
    pub calls: u64,
    pub hits: u64,
    pub enabled: bool,
    pub debug: bool,
}

impl AssistStatistic {
    /// Percentage of calls that completed.
    pub fn ratio(&self) -> u64 {
        ratio(self.calls, self.hits)
    }
}

fn ratio(calls: u64, hits: u64) -> u64 {
    if calls == 0 {
        100
    } else {
        hits * 100 / calls
    }
}

/// Statistics of one assist class, as returned by
/// [`AssistRegistry::statistics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsReport {
    pub class: AssistClass,
    /// Assists with at least one call, busiest first.
    pub entries: Vec<AssistStatistic>,
    /// Number of assists never called.
    pub not_shown: usize,
}

impl StatisticsReport {
    /// Calls across the listed assists.
    pub fn total_calls(&self) -> u64 {
        self.entries.iter().map(|e| e.calls).sum()
    }

    /// Completions across the listed assists.
    pub fn total_hits(&self) -> u64 {
        self.entries.iter().map(|e| e.hits).sum()
    }

    /// Calls made to assists the engine does not perform.
    pub fn unsupported_calls(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| !e.assist.is_supported())
            .map(|e| e.calls)
            .sum()
    }
}

const SEPARATOR: &str = "+-----------+----------+----------+-------+";

impl Display for StatisticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{SEPARATOR}")?;
        writeln!(
            f,
            "| {:<9} | {:<8} | {:<8} | {:<5} |",
            self.class.name(),
            "Calls",
            "Hits",
            "Ratio"
        )?;
        writeln!(f, "{SEPARATOR}")?;
        let mut flagged = false;
        for e in &self.entries {
            let marker = if !e.assist.is_supported() {
                '*'
            } else if !e.enabled {
                '-'
            } else if e.debug {
                '%'
            } else {
                ' '
            };
            flagged |= marker != ' ';
            writeln!(
                f,
                "| {:<8}{} | {:>8} | {:>8} | {:>4}% |",
                e.assist,
                marker,
                e.calls,
                e.hits,
                e.ratio()
            )?;
        }
        writeln!(f, "{SEPARATOR}")?;
        writeln!(
            f,
            "| {:<9} | {:>8} | {:>8} | {:>4}% |",
            "Total",
            self.total_calls(),
            self.total_hits(),
            ratio(self.total_calls(), self.total_hits())
        )?;
        writeln!(f, "{SEPARATOR}")?;
        if flagged {
            writeln!(f, "* : Unsupported, - : Disabled, % : Debug")?;
        }
        if self.not_shown > 0 {
            writeln!(f, "{} entries not shown (never invoked)", self.not_shown)?;
        }
        match self.unsupported_calls() {
            0 => {}
            1 => writeln!(f, "1 call was made to an unsupported function")?,
            n => writeln!(f, "{n} calls were made to unsupported functions")?,
        }
        Ok(())
    }
}
