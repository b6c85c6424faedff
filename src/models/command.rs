use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::TradeError;

use super::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Add,
    Buy,
    Sell,
    CommitBuy,
    CancelBuy,
    CommitSell,
    CancelSell,
    SetBuyAmount,
    SetBuyTrigger,
    SetSellAmount,
    SetSellTrigger,
    CancelSetBuy,
    CancelSetSell,
    DisplaySummary,
    Dumplog,
    Quote,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Add => "ADD",
            CommandKind::Buy => "BUY",
            CommandKind::Sell => "SELL",
            CommandKind::CommitBuy => "COMMIT_BUY",
            CommandKind::CancelBuy => "CANCEL_BUY",
            CommandKind::CommitSell => "COMMIT_SELL",
            CommandKind::CancelSell => "CANCEL_SELL",
            CommandKind::SetBuyAmount => "SET_BUY_AMOUNT",
            CommandKind::SetBuyTrigger => "SET_BUY_TRIGGER",
            CommandKind::SetSellAmount => "SET_SELL_AMOUNT",
            CommandKind::SetSellTrigger => "SET_SELL_TRIGGER",
            CommandKind::CancelSetBuy => "CANCEL_SET_BUY",
            CommandKind::CancelSetSell => "CANCEL_SET_SELL",
            CommandKind::DisplaySummary => "DISPLAY_SUMMARY",
            CommandKind::Dumplog => "DUMPLOG",
            CommandKind::Quote => "QUOTE",
        }
    }

    fn needs_stock(self) -> bool {
        matches!(
            self,
            CommandKind::Buy
                | CommandKind::Sell
                | CommandKind::SetBuyAmount
                | CommandKind::SetBuyTrigger
                | CommandKind::SetSellAmount
                | CommandKind::SetSellTrigger
                | CommandKind::CancelSetBuy
                | CommandKind::CancelSetSell
                | CommandKind::Quote
        )
    }

    fn needs_amount(self) -> bool {
        matches!(
            self,
            CommandKind::Add
                | CommandKind::Buy
                | CommandKind::Sell
                | CommandKind::SetBuyAmount
                | CommandKind::SetBuyTrigger
                | CommandKind::SetSellAmount
                | CommandKind::SetSellTrigger
        )
    }
}

impl FromStr for CommandKind {
    type Err = TradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim().to_ascii_uppercase().as_str() {
            "ADD" => CommandKind::Add,
            "BUY" => CommandKind::Buy,
            "SELL" => CommandKind::Sell,
            "COMMIT_BUY" => CommandKind::CommitBuy,
            "CANCEL_BUY" => CommandKind::CancelBuy,
            "COMMIT_SELL" => CommandKind::CommitSell,
            "CANCEL_SELL" => CommandKind::CancelSell,
            "SET_BUY_AMOUNT" => CommandKind::SetBuyAmount,
            "SET_BUY_TRIGGER" => CommandKind::SetBuyTrigger,
            "SET_SELL_AMOUNT" => CommandKind::SetSellAmount,
            "SET_SELL_TRIGGER" => CommandKind::SetSellTrigger,
            "CANCEL_SET_BUY" => CommandKind::CancelSetBuy,
            "CANCEL_SET_SELL" => CommandKind::CancelSetSell,
            "DISPLAY_SUMMARY" => CommandKind::DisplaySummary,
            "DUMPLOG" => CommandKind::Dumplog,
            "QUOTE" => CommandKind::Quote,
            other => return Err(TradeError::InvalidCommand(format!("unknown command {other:?}"))),
        };
        Ok(kind)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command as it arrives from the gateway. `Amount` is still text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CommandRequest {
    pub command: String,
    pub username: String,
    pub amount: String,
    pub stock: String,
    pub filename: String,
}

/// A validated command.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    pub username: String,
    pub stock: String,
    pub amount: Option<Decimal>,
    pub filename: String,
}

impl Command {
    pub fn new(kind: CommandKind, username: &str) -> Self {
        Command {
            kind,
            username: username.to_string(),
            stock: String::new(),
            amount: None,
            filename: String::new(),
        }
    }

    pub fn with_stock(mut self, stock: &str) -> Self {
        self.stock = stock.to_string();
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = filename.to_string();
        self
    }

    /// The side a trade/trigger command acts on.
    pub fn side(&self) -> Option<Side> {
        match self.kind {
            CommandKind::Buy
            | CommandKind::CommitBuy
            | CommandKind::CancelBuy
            | CommandKind::SetBuyAmount
            | CommandKind::SetBuyTrigger
            | CommandKind::CancelSetBuy => Some(Side::Buy),
            CommandKind::Sell
            | CommandKind::CommitSell
            | CommandKind::CancelSell
            | CommandKind::SetSellAmount
            | CommandKind::SetSellTrigger
            | CommandKind::CancelSetSell => Some(Side::Sell),
            _ => None,
        }
    }

    /// Amount of a command that passed `validate`.
    pub fn positive_amount(&self) -> Result<Decimal, TradeError> {
        self.amount
            .filter(|a| *a > Decimal::ZERO)
            .ok_or_else(|| TradeError::InvalidCommand(format!("{} requires a positive amount", self.kind)))
    }

    pub fn validate(&self) -> Result<(), TradeError> {
        let admin_dump = self.kind == CommandKind::Dumplog && !self.filename.is_empty();
        if self.username.is_empty() && !admin_dump {
            return Err(TradeError::InvalidCommand(format!("{} requires a username", self.kind)));
        }
        if self.kind.needs_stock() && self.stock.is_empty() {
            return Err(TradeError::InvalidCommand(format!("{} requires a stock symbol", self.kind)));
        }
        if self.kind.needs_amount() {
            self.positive_amount()?;
        }
        Ok(())
    }
}

impl TryFrom<CommandRequest> for Command {
    type Error = TradeError;

    fn try_from(req: CommandRequest) -> Result<Self, Self::Error> {
        let kind: CommandKind = req.command.parse()?;

        let raw_amount = req.amount.trim_end_matches('\r').trim();
        let amount = if raw_amount.is_empty() {
            None
        } else {
            let parsed = Decimal::from_str(raw_amount)
                .map_err(|_| TradeError::InvalidCommand(format!("amount {raw_amount:?} is not a number")))?;
            Some(parsed)
        };

        let cmd = Command {
            kind,
            username: req.username.trim().to_string(),
            stock: req.stock.trim().to_uppercase(),
            amount,
            filename: req.filename.trim().to_string(),
        };
        cmd.validate()?;
        Ok(cmd)
    }
}

/// Reply routed back to the caller. Exactly one of `data` / `error` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command: String,
    #[serde(with = "base64_bytes", default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub error: String,
}

impl CommandResponse {
    pub fn ok(command: &str, data: Vec<u8>) -> Self {
        CommandResponse {
            command: command.to_string(),
            data,
            error: String::new(),
        }
    }

    pub fn err(command: &str, error: &TradeError) -> Self {
        CommandResponse {
            command: command.to_string(),
            data: Vec::new(),
            error: error.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.data).ok()
    }
}

// []byte on the wire is base64, as the gateway expects
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = Option::<String>::deserialize(d)?.unwrap_or_default();
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(command: &str, username: &str, amount: &str, stock: &str) -> CommandRequest {
        CommandRequest {
            command: command.into(),
            username: username.into(),
            amount: amount.into(),
            stock: stock.into(),
            filename: String::new(),
        }
    }

    #[test]
    fn parses_amount_with_trailing_carriage_return() {
        let cmd = Command::try_from(request("ADD", "user1", "63511.53\r", "")).unwrap();
        assert_eq!(cmd.kind, CommandKind::Add);
        assert_eq!(cmd.amount, Some(Decimal::from_str("63511.53").unwrap()));
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(matches!(
            Command::try_from(request("BUY", "user1", "10", "")),
            Err(TradeError::InvalidCommand(_))
        ));
        assert!(matches!(
            Command::try_from(request("ADD", "", "10", "")),
            Err(TradeError::InvalidCommand(_))
        ));
        assert!(matches!(
            Command::try_from(request("SET_BUY_TRIGGER", "user1", "abc", "AAPL")),
            Err(TradeError::InvalidCommand(_))
        ));
        assert!(matches!(
            Command::try_from(request("SELL", "user1", "-5", "AAPL")),
            Err(TradeError::InvalidCommand(_))
        ));
        assert!(matches!(
            Command::try_from(request("SHORT", "user1", "1", "AAPL")),
            Err(TradeError::InvalidCommand(_))
        ));
    }

    #[test]
    fn dumplog_without_user_needs_filename() {
        let mut req = request("DUMPLOG", "", "", "");
        assert!(Command::try_from(req.clone()).is_err());
        req.filename = "out.log".into();
        let cmd = Command::try_from(req).unwrap();
        assert_eq!(cmd.filename, "out.log");
    }

    #[test]
    fn response_data_is_base64_on_the_wire() {
        let res = CommandResponse::ok("QUOTE", b"hi".to_vec());
        let text = serde_json::to_string(&res).unwrap();
        assert!(text.contains("\"data\":\"aGk=\""));

        let back: CommandResponse = serde_json::from_str(&text).unwrap();
        assert_eq!(back.data, b"hi");
    }
}
