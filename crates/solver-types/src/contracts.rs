//! Solidity bindings for the contracts the solver talks to.

pub use crate::intent::abi::IPortal;

alloy::sol! {
	interface IERC20 {
		function balanceOf(address owner) external view returns (uint256);
		function allowance(address owner, address spender) external view returns (uint256);
		function approve(address spender, uint256 amount) external returns (bool);
		function decimals() external view returns (uint8);
	}

	/// EIP-2612 extension plus the optional `version()` getter.
	interface IERC20Permit {
		function name() external view returns (string);
		function version() external view returns (string);
		function nonces(address owner) external view returns (uint256);
		function permit(address owner, address spender, uint256 value, uint256 deadline, uint8 v, bytes32 r, bytes32 s) external;
	}

	/// Allowance transfer half of Permit2; the structs double as its
	/// EIP-712 types.
	interface IPermit2 {
		struct PermitDetails {
			address token;
			uint160 amount;
			uint48 expiration;
			uint48 nonce;
		}

		struct PermitSingle {
			PermitDetails details;
			address spender;
			uint256 sigDeadline;
		}

		struct PermitBatch {
			PermitDetails[] details;
			address spender;
			uint256 sigDeadline;
		}

		function allowance(address owner, address token, address spender) external view returns (uint160 amount, uint48 expiration, uint48 nonce);
		function permit(address owner, PermitSingle permitSingle, bytes signature) external;
		function permit(address owner, PermitBatch permitBatch, bytes signature) external;
	}

	interface ITokenMessenger {
		function depositForBurn(uint256 amount, uint32 destinationDomain, bytes32 mintRecipient, address burnToken) external returns (uint64 nonce);
	}

	interface IMessageTransmitter {
		event MessageSent(bytes message);
		function receiveMessage(bytes message, bytes attestation) external returns (bool success);
	}
}
