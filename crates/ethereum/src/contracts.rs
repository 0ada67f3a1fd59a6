use alloy::sol;

// Contract interfaces used by the marketplace
sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);

        function decimals() external view returns (uint8);

        function symbol() external view returns (string);

        function allowance(address owner, address spender) external view returns (uint256);

        function approve(address spender, uint256 amount) external returns (bool);
    }

    #[sol(rpc)]
    interface IChannelMarket {
        event ChannelJoined(uint256 indexed channelId, address indexed buyer, uint256 price);

        event OfferAccepted(uint256 indexed offerId, address indexed seller, address indexed buyer, uint256 price);

        function joinChannel(uint256 channelId, uint256 price) external payable;

        function acceptTicketOffer(
            uint256 offerId,
            uint256 ticketId,
            uint256 price,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external payable;

        function acceptChannelOffer(
            uint256 offerId,
            uint256 channelId,
            uint256 price,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external payable;
    }
}
