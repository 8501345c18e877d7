//! Reply texts in the admin's language.

use std::fmt;

use crate::storage::DEFAULT_LANG;

/// Interface language of an admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    Ru,
    En,
}

impl Lang {
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "ru" => Some(Self::Ru),
            "en" => Some(Self::En),
            _ => None,
        }
    }

    /// Language for a stored code; unknown codes fall back to the default.
    #[must_use]
    pub fn from_stored(code: &str) -> Self {
        Self::from_code(code)
            .or_else(|| Self::from_code(DEFAULT_LANG))
            .unwrap_or(Self::Ru)
    }

    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Ru => "ru",
            Self::En => "en",
        }
    }

    #[must_use]
    pub const fn text(self, msg: Msg) -> &'static str {
        match self {
            Self::Ru => ru(msg),
            Self::En => en(msg),
        }
    }

    /// `Usage: <syntax>` for a command name.
    #[must_use]
    pub fn usage(self, command: &str) -> String {
        format!("{}: {}", self.text(Msg::Usage), syntax(command))
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Reply keys. Templates use `{name}` placeholders, see [`fill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Msg {
    Welcome,
    Help,
    Usage,
    GenericError,
    NoPairs,
    PairsTitle,
    PairLine,
    On,
    Off,
    PairAdded,
    PairResolveWarn,
    PairRemoved,
    PairNotFound,
    StatsTitle,
    StatsLine,
    StatsTotal,
    Never,
    RuleAdded,
    RuleRemoved,
    RuleNotFound,
    RulesRemovedByPattern,
    RulesTitle,
    NoRules,
    RegexInvalid,
    EmptyReplacement,
    ButtonsTitle,
    NoButtons,
    ButtonsSet,
    ButtonsRemoved,
    ScrapeLatestStarted,
    ScrapeFirstStarted,
    ScrapeFullStarted,
    RealtimeOn,
    RealtimeOff,
    ResetDone,
    ClearDone,
    ClearDoneAll,
    LangSet,
}

const fn ru(msg: Msg) -> &'static str {
    match msg {
        Msg::Welcome => "Бот клонирования каналов.\nДобавьте пару: /addpair <донор> <цель>\nВсе команды: /help",
        Msg::Help => "Команды:\n\
            /addpair <донор> <цель> — добавить пару\n\
            /removepair <id> — удалить пару\n\
            /pairs — список пар\n\
            /stats — статистика\n\
            /addrule <шаблон> [замена] — правило замены (regex: для регулярных выражений)\n\
            /removerule <id> — удалить правило\n\
            /removerulepat <шаблон> — удалить правила по шаблону\n\
            /rules — правила и кнопки\n\
            /addbtn1 текст|url — одна кнопка\n\
            /addbtn2 t1|u1 || t2|u2 — две кнопки\n\
            /addbtn3 t1|u1 || t2|u2 || t3|u3 — три кнопки\n\
            /removebtn — удалить кнопки\n\
            /latest <пара> [n] — скрап n последних постов\n\
            /first <пара> [n] — скрап n самых старых постов\n\
            /full <пара> — полный скрап\n\
            /realtime <пара> [on|off] — скрап в реальном времени\n\
            /reset <пара> — сбросить прогресс скрапа\n\
            /cleardb [all] — очистить базу\n\
            /lang <ru|en> — язык\n\n\
            Бот должен быть администратором целевого канала.",
        Msg::Usage => "Использование",
        Msg::GenericError => "❌ Ошибка: {error}",
        Msg::NoPairs => "Нет настроенных пар каналов.",
        Msg::PairsTitle => "📋 Пары каналов:",
        Msg::PairLine => "#{id}: {donor} → {target} (реальное время: {realtime})",
        Msg::On => "вкл",
        Msg::Off => "выкл",
        Msg::PairAdded => "✅ Пара добавлена!\nID пары: {id}\nДонор: {donor}\nЦель: {target}",
        Msg::PairResolveWarn => "⚠️ Не удалось проверить донора: {error}\nСохраняю указанное значение.",
        Msg::PairRemoved => "✅ Пара {id} удалена.",
        Msg::PairNotFound => "❌ Пара {id} не найдена.",
        Msg::StatsTitle => "📊 Статистика:",
        Msg::StatsLine => "#{id}: {donor} → {target}: {posts} постов, последний: {last}",
        Msg::StatsTotal => "Всего постов: {total}",
        Msg::Never => "никогда",
        Msg::RuleAdded => "✅ Правило добавлено!\nID правила: {id}\nШаблон: {pattern}\nЗамена: {replacement}",
        Msg::RuleRemoved => "✅ Правило {id} удалено.",
        Msg::RuleNotFound => "❌ Правило {id} не найдено.",
        Msg::RulesRemovedByPattern => "✅ Удалено правил с шаблоном {pattern}: {count}",
        Msg::RulesTitle => "🧮 Правила замены:",
        Msg::NoRules => "Правила ещё не настроены.",
        Msg::RegexInvalid => "⚠️ Регулярное выражение не компилируется, правило будет пропускаться: {error}",
        Msg::EmptyReplacement => "⛔ (пусто/удаление)",
        Msg::ButtonsTitle => "🧷 Кнопки ({mode}):",
        Msg::NoButtons => "Кнопки не настроены.",
        Msg::ButtonsSet => "✅ Кнопки обновлены!",
        Msg::ButtonsRemoved => "✅ Кнопки удалены!",
        Msg::ScrapeLatestStarted => "Запущен скрап {n} последних постов для пары {id}.",
        Msg::ScrapeFirstStarted => "Запущен скрап {n} первых постов для пары {id}.",
        Msg::ScrapeFullStarted => "Запущен полный скрап для пары {id}.\nПосле завершения можно включить режим реального времени: /realtime {id} on",
        Msg::RealtimeOn => "Режим реального времени включён для пары {id}.",
        Msg::RealtimeOff => "Режим реального времени выключен для пары {id}.",
        Msg::ResetDone => "Прогресс скрапа и счётчик постов для пары {id} сброшены.",
        Msg::ClearDone => "✅ База очищена (пары/статистика/обработанные сообщения).",
        Msg::ClearDoneAll => "✅ База очищена (включая правила и кнопки).",
        Msg::LangSet => "Язык переключен на русский.",
    }
}

const fn en(msg: Msg) -> &'static str {
    match msg {
        Msg::Welcome => "Channel cloning bot.\nAdd a pair: /addpair <donor> <target>\nAll commands: /help",
        Msg::Help => "Commands:\n\
            /addpair <donor> <target> - add a pair\n\
            /removepair <id> - remove a pair\n\
            /pairs - list pairs\n\
            /stats - statistics\n\
            /addrule <pattern> [replacement] - replacement rule (regex: for regular expressions)\n\
            /removerule <id> - remove a rule\n\
            /removerulepat <pattern> - remove rules by pattern\n\
            /rules - rules and buttons\n\
            /addbtn1 text|url - one button\n\
            /addbtn2 t1|u1 || t2|u2 - two buttons\n\
            /addbtn3 t1|u1 || t2|u2 || t3|u3 - three buttons\n\
            /removebtn - remove buttons\n\
            /latest <pair> [n] - scrape the n newest posts\n\
            /first <pair> [n] - scrape the n oldest posts\n\
            /full <pair> - full scrape\n\
            /realtime <pair> [on|off] - realtime scraping\n\
            /reset <pair> - reset scrape progress\n\
            /cleardb [all] - clear the database\n\
            /lang <ru|en> - language\n\n\
            The bot must be an admin of the target channel.",
        Msg::Usage => "Usage",
        Msg::GenericError => "❌ Error: {error}",
        Msg::NoPairs => "No channel pairs configured.",
        Msg::PairsTitle => "📋 Channel pairs:",
        Msg::PairLine => "#{id}: {donor} → {target} (realtime: {realtime})",
        Msg::On => "on",
        Msg::Off => "off",
        Msg::PairAdded => "✅ Pair added!\nPair ID: {id}\nDonor: {donor}\nTarget: {target}",
        Msg::PairResolveWarn => "⚠️ Could not check the donor: {error}\nKeeping the given value.",
        Msg::PairRemoved => "✅ Pair {id} removed.",
        Msg::PairNotFound => "❌ Pair {id} not found.",
        Msg::StatsTitle => "📊 Statistics:",
        Msg::StatsLine => "#{id}: {donor} → {target}: {posts} posts, last: {last}",
        Msg::StatsTotal => "Total posts: {total}",
        Msg::Never => "never",
        Msg::RuleAdded => "✅ Rule added!\nRule ID: {id}\nPattern: {pattern}\nReplacement: {replacement}",
        Msg::RuleRemoved => "✅ Rule {id} removed.",
        Msg::RuleNotFound => "❌ Rule {id} not found.",
        Msg::RulesRemovedByPattern => "✅ Rules removed with pattern {pattern}: {count}",
        Msg::RulesTitle => "🧮 Replacement rules:",
        Msg::NoRules => "No rules configured yet.",
        Msg::RegexInvalid => "⚠️ The regular expression does not compile, the rule will be skipped: {error}",
        Msg::EmptyReplacement => "⛔ (empty/remove)",
        Msg::ButtonsTitle => "🧷 Buttons ({mode}):",
        Msg::NoButtons => "No buttons configured.",
        Msg::ButtonsSet => "✅ Buttons updated!",
        Msg::ButtonsRemoved => "✅ Buttons removed!",
        Msg::ScrapeLatestStarted => "Started scraping the {n} newest posts of pair {id}.",
        Msg::ScrapeFirstStarted => "Started scraping the {n} oldest posts of pair {id}.",
        Msg::ScrapeFullStarted => "Started a full scrape of pair {id}.\nWhen it is done you can enable realtime mode: /realtime {id} on",
        Msg::RealtimeOn => "Realtime mode enabled for pair {id}.",
        Msg::RealtimeOff => "Realtime mode disabled for pair {id}.",
        Msg::ResetDone => "Scrape progress and post counter of pair {id} were reset.",
        Msg::ClearDone => "✅ Database cleared (pairs/statistics/processed messages).",
        Msg::ClearDoneAll => "✅ Database cleared (including rules and buttons).",
        Msg::LangSet => "Language switched to English.",
    }
}

fn syntax(command: &str) -> &'static str {
    match command {
        "addpair" => "/addpair <donor> <target>  (@name, t.me/name or -100…)",
        "removepair" => "/removepair <pair_id>",
        "addrule" => "/addrule <pattern> [replacement]",
        "removerule" => "/removerule <rule_id>",
        "removerulepat" => "/removerulepat <pattern>",
        "addbtn1" => "/addbtn1 text|url",
        "addbtn2" => "/addbtn2 t1|u1 || t2|u2",
        "addbtn3" => "/addbtn3 t1|u1 || t2|u2 || t3|u3",
        "latest" => "/latest <pair_id> [n]",
        "first" => "/first <pair_id> [n]",
        "full" => "/full <pair_id>",
        "realtime" => "/realtime <pair_id> [on|off]",
        "reset" => "/reset <pair_id>",
        "cleardb" => "/cleardb [all]",
        "lang" => "/lang <ru|en>",
        _ => "/help",
    }
}

/// Substitutes `{name}` placeholders in `template`.
#[must_use]
pub fn fill(template: &str, args: &[(&str, &dyn fmt::Display)]) -> String {
    args.iter().fold(template.to_owned(), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), &value.to_string())
    })
}
